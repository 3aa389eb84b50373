//! Definition registry (C1, §4.1). Holds object/resource *type* metadata,
//! immutable once registered. The per-resource handler vtable is
//! re-expressed as the `ResourceHandler` capability trait (§9a) rather than
//! a raw function pointer with a `void *` context.

use crate::error::CoreError;
use crate::value::{Value, ValueKind};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Multiple { max: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operations {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Operations {
    pub const NONE: Operations = Operations { read: false, write: false, execute: false };
    pub const READ_ONLY: Operations = Operations { read: true, write: false, execute: false };
    pub const READ_WRITE: Operations = Operations { read: true, write: true, execute: false };
    pub const EXECUTABLE: Operations = Operations { read: false, write: false, execute: true };
}

/// A resource's static type metadata (§3).
#[derive(Clone)]
pub struct ResourceDefinition {
    pub id: u16,
    pub name: &'static str,
    pub value_kind: ValueKind,
    pub cardinality: Cardinality,
    pub mandatory: bool,
    pub operations: Operations,
    pub default: Option<Value>,
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("value_kind", &self.value_kind)
            .field("cardinality", &self.cardinality)
            .field("mandatory", &self.mandatory)
            .field("operations", &self.operations)
            .finish()
    }
}

impl ResourceDefinition {
    /// Validates the invariants in §3: the operation set must be consistent
    /// with the type (Execute only when type = none); a mandatory resource
    /// has min-cardinality >= 1 (implicit: mandatory resources are always
    /// present, so no separate min field is tracked beyond `mandatory`).
    fn validate(&self) -> Result<(), CoreError> {
        if self.operations.execute && !self.value_kind.is_executable() {
            return Err(CoreError::DefinitionInvalid {
                reason: format!(
                    "resource {} declares Execute but has value kind {:?}",
                    self.id, self.value_kind
                ),
            });
        }
        if let Cardinality::Multiple { max } = self.cardinality
            && max == 0
        {
            return Err(CoreError::DefinitionInvalid {
                reason: format!("resource {} has multiple cardinality with max=0", self.id),
            });
        }
        Ok(())
    }
}

/// A capability trait standing in for the original's resource-operation
/// vtable (§9a). Every method defaults to the store's own behaviour, so a
/// definition that supplies no handler behaves as a plain data resource.
pub trait ResourceHandler: Send + Sync {
    fn read(&self, _current: Option<&Value>) -> Result<Option<Value>, CoreError> {
        Ok(_current.cloned())
    }

    fn write(&self, _proposed: Value) -> Result<Value, CoreError> {
        Ok(_proposed)
    }

    fn execute(&self, _args: &[u8]) -> Result<(), CoreError> {
        Err(CoreError::MethodNotAllowed { path: String::new() })
    }

    fn create_optional(&self) -> Result<Value, CoreError> {
        Err(CoreError::MethodNotAllowed { path: String::new() })
    }
}

/// The store's fallback behaviour when no custom handler is registered.
pub struct DefaultResourceHandler;
impl ResourceHandler for DefaultResourceHandler {}

/// An object's static type metadata (§3).
pub struct ObjectDefinition {
    pub id: u16,
    pub name: &'static str,
    pub cardinality: Cardinality,
    pub mandatory: bool,
    resources: HashMap<u16, ResourceDefinition>,
    resource_order: Vec<u16>,
    handlers: HashMap<u16, Box<dyn ResourceHandler>>,
}

impl fmt::Debug for ObjectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("mandatory", &self.mandatory)
            .field("resource_order", &self.resource_order)
            .finish()
    }
}

impl ObjectDefinition {
    pub fn new(id: u16, name: &'static str, cardinality: Cardinality, mandatory: bool) -> Self {
        ObjectDefinition {
            id,
            name,
            cardinality,
            mandatory,
            resources: HashMap::new(),
            resource_order: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_resource(mut self, def: ResourceDefinition) -> Self {
        self.resource_order.push(def.id);
        self.resources.insert(def.id, def);
        self
    }

    pub fn with_handler(mut self, resource_id: u16, handler: Box<dyn ResourceHandler>) -> Self {
        self.handlers.insert(resource_id, handler);
        self
    }

    pub fn resource(&self, resource_id: u16) -> Option<&ResourceDefinition> {
        self.resources.get(&resource_id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.resource_order.iter().filter_map(|id| self.resources.get(id))
    }

    pub fn handler(&self, resource_id: u16) -> &dyn ResourceHandler {
        self.handlers
            .get(&resource_id)
            .map(|b| b.as_ref())
            .unwrap_or(&DefaultResourceHandler)
    }

    fn equivalent(&self, other: &ObjectDefinition) -> bool {
        if self.cardinality != other.cardinality
            || self.mandatory != other.mandatory
            || self.resource_order != other.resource_order
        {
            return false;
        }
        self.resource_order.iter().all(|id| {
            matches!(
                (self.resources.get(id), other.resources.get(id)),
                (Some(a), Some(b))
                    if a.value_kind == b.value_kind
                        && a.cardinality == b.cardinality
                        && a.mandatory == b.mandatory
                        && a.operations == b.operations
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefineOutcome {
    Created,
    AlreadyDefinedIdentical,
}

/// C1: the definition registry. Definitions must be registered before any
/// instance of them is created (§4.1).
#[derive(Default)]
pub struct DefinitionRegistry {
    objects: HashMap<u16, ObjectDefinition>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        DefinitionRegistry { objects: HashMap::new() }
    }

    /// Seeds the registry with the built-in Security (0), Server (1), and
    /// Access-Control (2) object definitions (§3a), matching the original
    /// client's always-present `Lwm2mSecurityObject_Create` /
    /// `Lwm2mServerObject_Create` / ACL registration at startup.
    pub fn with_builtin_objects() -> Self {
        let mut reg = DefinitionRegistry::new();
        reg.define_object(crate::security::definition()).expect("builtin security definition");
        reg.define_object(crate::server::definition()).expect("builtin server definition");
        reg.define_object(crate::acl::definition()).expect("builtin acl definition");
        reg
    }

    pub fn define_object(&mut self, def: ObjectDefinition) -> Result<DefineOutcome, CoreError> {
        for r in def.resources() {
            r.validate()?;
        }
        match self.objects.get(&def.id) {
            None => {
                self.objects.insert(def.id, def);
                Ok(DefineOutcome::Created)
            }
            Some(existing) if existing.equivalent(&def) => Ok(DefineOutcome::AlreadyDefinedIdentical),
            Some(_) => Err(CoreError::AlreadyExists { path: format!("/{}", def.id) }),
        }
    }

    pub fn lookup_object(&self, object_id: u16) -> Option<&ObjectDefinition> {
        self.objects.get(&object_id)
    }

    pub fn lookup_resource(&self, object_id: u16, resource_id: u16) -> Option<&ResourceDefinition> {
        self.objects.get(&object_id)?.resource(resource_id)
    }

    pub fn next_object_id(&self, after: u16) -> Option<u16> {
        self.objects.keys().copied().filter(|id| *id > after).min()
    }

    pub fn next_resource_id(&self, object_id: u16, after: u16) -> Option<u16> {
        self.objects.get(&object_id)?.resource_order.iter().copied().filter(|id| *id > after).min()
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectDefinition> {
        self.objects.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_object() -> ObjectDefinition {
        ObjectDefinition::new(10000, "Test", Cardinality::Multiple { max: 10 }, false)
            .with_resource(ResourceDefinition {
                id: 0,
                name: "Counter",
                value_kind: ValueKind::Integer,
                cardinality: Cardinality::Single,
                mandatory: true,
                operations: Operations::READ_WRITE,
                default: None,
            })
    }

    #[test]
    fn redefinition_with_identical_fields_is_idempotent() {
        let mut reg = DefinitionRegistry::new();
        assert_eq!(reg.define_object(simple_object()).unwrap(), DefineOutcome::Created);
        assert_eq!(
            reg.define_object(simple_object()).unwrap(),
            DefineOutcome::AlreadyDefinedIdentical
        );
    }

    #[test]
    fn redefinition_with_differing_fields_fails() {
        let mut reg = DefinitionRegistry::new();
        reg.define_object(simple_object()).unwrap();
        let different = ObjectDefinition::new(10000, "Test", Cardinality::Multiple { max: 10 }, false)
            .with_resource(ResourceDefinition {
                id: 0,
                name: "Counter",
                value_kind: ValueKind::String,
                cardinality: Cardinality::Single,
                mandatory: true,
                operations: Operations::READ_WRITE,
                default: None,
            });
        assert!(reg.define_object(different).is_err());
    }

    #[test]
    fn execute_on_non_none_type_is_invalid() {
        let mut reg = DefinitionRegistry::new();
        let bad = ObjectDefinition::new(1, "Bad", Cardinality::Single, false).with_resource(
            ResourceDefinition {
                id: 0,
                name: "Bad",
                value_kind: ValueKind::Integer,
                cardinality: Cardinality::Single,
                mandatory: false,
                operations: Operations::EXECUTABLE,
                default: None,
            },
        );
        assert!(reg.define_object(bad).is_err());
    }

    #[test]
    fn builtin_objects_are_registered() {
        let reg = DefinitionRegistry::with_builtin_objects();
        assert!(reg.lookup_object(0).is_some());
        assert!(reg.lookup_object(1).is_some());
        assert!(reg.lookup_object(2).is_some());
        assert!(reg.lookup_resource(0, 10).is_some()); // Short Server ID
    }
}
