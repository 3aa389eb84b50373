//! Opaque content format (§4.4): raw bytes for a single resource-instance
//! of opaque type.

use crate::definition::DefinitionRegistry;
use crate::error::CoreError;
use crate::path::Path;
use crate::store::ObjectStore;
use crate::value::{Value, ValueKind};

pub fn encode(defs: &DefinitionRegistry, store: &ObjectStore, path: Path) -> Result<Vec<u8>, CoreError> {
    if !path.is_resource() && !path.is_resource_instance() {
        return Err(CoreError::PathInvalid { path: path.to_string() });
    }
    let riid = if path.is_resource() { 0 } else { path.resource_instance_id };
    let value = store.get(defs, path.object_id, path.object_instance_id, path.resource_id, riid)?;
    match value {
        Value::Opaque(bytes) => Ok(bytes),
        other => Err(CoreError::TypeMismatch {
            path: path.to_string(),
            expected: ValueKind::Opaque,
            found: other.kind(),
        }),
    }
}

pub fn decode(bytes: &[u8], target: Path, defs: &DefinitionRegistry) -> Result<Vec<(Path, Value)>, CoreError> {
    let res_def = defs
        .lookup_resource(target.object_id, target.resource_id)
        .ok_or_else(|| CoreError::NotDefined { path: target.to_string() })?;
    if res_def.value_kind != ValueKind::Opaque {
        return Err(CoreError::TypeMismatch {
            path: target.to_string(),
            expected: ValueKind::Opaque,
            found: res_def.value_kind,
        });
    }
    let riid = if target.is_resource_instance() { target.resource_instance_id } else { 0 };
    Ok(vec![(
        Path::resource_instance(target.object_id, target.object_instance_id, target.resource_id, riid),
        Value::Opaque(bytes.to_vec()),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};

    #[test]
    fn round_trips_raw_bytes() {
        let mut defs = DefinitionRegistry::new();
        defs.define_object(
            ObjectDefinition::new(10000, "Test", Cardinality::Single, false).with_resource(
                ResourceDefinition {
                    id: 0,
                    name: "Blob",
                    value_kind: ValueKind::Opaque,
                    cardinality: Cardinality::Single,
                    mandatory: true,
                    operations: Operations::READ_WRITE,
                    default: None,
                },
            ),
        )
        .unwrap();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 0, 0, Value::Opaque(vec![1, 2, 3, 255])).unwrap();

        let path = Path::resource(10000, 0, 0);
        let bytes = encode(&defs, &store, path).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 255]);

        let decoded = decode(&bytes, path, &defs).unwrap();
        assert_eq!(decoded[0].1, Value::Opaque(vec![1, 2, 3, 255]));
    }
}
