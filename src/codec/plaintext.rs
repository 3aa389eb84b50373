//! Plain-text content format (§4.4): a single resource-instance, lossless
//! for primitive types, boolean encoded as `"0"`/`"1"`.

use super::{text_to_value, value_to_text};
use crate::definition::DefinitionRegistry;
use crate::error::CoreError;
use crate::path::Path;
use crate::store::ObjectStore;
use crate::value::Value;

pub fn encode(defs: &DefinitionRegistry, store: &ObjectStore, path: Path) -> Result<Vec<u8>, CoreError> {
    if !path.is_resource() && !path.is_resource_instance() {
        return Err(CoreError::PathInvalid { path: path.to_string() });
    }
    let riid = if path.is_resource() { 0 } else { path.resource_instance_id };
    let value = store.get(defs, path.object_id, path.object_instance_id, path.resource_id, riid)?;
    Ok(value_to_text(&path, &value)?.into_bytes())
}

pub fn decode(bytes: &[u8], target: Path, defs: &DefinitionRegistry) -> Result<Vec<(Path, Value)>, CoreError> {
    let res_def = defs
        .lookup_resource(target.object_id, target.resource_id)
        .ok_or_else(|| CoreError::NotDefined { path: target.to_string() })?;
    let text = std::str::from_utf8(bytes)
        .map_err(|_| CoreError::PayloadMalformed { reason: "not valid utf-8".to_string() })?;
    let value = text_to_value(res_def.value_kind, &target, text)?;
    let riid = if target.is_resource_instance() { target.resource_instance_id } else { 0 };
    Ok(vec![(Path::resource_instance(target.object_id, target.object_instance_id, target.resource_id, riid), value)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};
    use crate::value::ValueKind;

    fn defs() -> DefinitionRegistry {
        let mut reg = DefinitionRegistry::new();
        reg.define_object(
            ObjectDefinition::new(10000, "Test", Cardinality::Multiple { max: 4 }, false).with_resource(
                ResourceDefinition {
                    id: 0,
                    name: "Counter",
                    value_kind: ValueKind::Integer,
                    cardinality: Cardinality::Single,
                    mandatory: true,
                    operations: Operations::READ_WRITE,
                    default: None,
                },
            ),
        )
        .unwrap();
        reg
    }

    #[test]
    fn round_trips_integer() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 0, 0, Value::Integer(123456789)).unwrap();

        let path = Path::resource(10000, 0, 0);
        let bytes = encode(&defs, &store, path).unwrap();
        assert_eq!(bytes, b"123456789");

        let decoded = decode(&bytes, path, &defs).unwrap();
        assert_eq!(decoded, vec![(Path::resource_instance(10000, 0, 0, 0), Value::Integer(123456789))]);
    }

    #[test]
    fn boolean_encodes_as_0_or_1() {
        let p = Path::resource(3, 0, 1);
        let text = value_to_text(&p, &Value::Boolean(true)).unwrap();
        assert_eq!(text, "1");
    }
}
