//! Typed resource values (§3, §9: "`void *` resource values tagged by a
//! sibling type enum" re-expressed as a sum type over the eight LwM2M value
//! kinds plus their array variants).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    None,
    String,
    Integer,
    Float,
    Boolean,
    Opaque,
    Time,
    ObjectLink,
}

/// An object-link value: `(object_id, object_instance_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLink {
    pub object_id: u16,
    pub object_instance_id: u16,
}

/// A single resource-instance's value. Scalar, not array-typed: array
/// cardinality is a property of how many resource-instances exist under a
/// resource (§3), not of this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Opaque(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Time(i64),
    ObjectLink(ObjectLink),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Opaque(_) => ValueKind::Opaque,
            Value::Time(_) => ValueKind::Time,
            Value::ObjectLink(_) => ValueKind::ObjectLink,
        }
    }

    /// Numeric reading used by gt/lt/st evaluation (§4.6.3). Non-numeric
    /// kinds have no comparable reading.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Time(t) => Some(*t as f64),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }
}

impl ValueKind {
    /// Whether a resource of this kind may carry `Execute` (§3: "Execute
    /// only when type = none").
    pub fn is_executable(self) -> bool {
        matches!(self, ValueKind::None)
    }
}
