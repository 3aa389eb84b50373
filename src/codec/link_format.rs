//! CoRE link-format (§4.4, RFC 6690): object/instance listings used for the
//! registration payload and for Discover. Re-expresses the Design Notes'
//! "string-formatted CoRE link payloads built with `sprintf`" as a builder
//! over iterators of the definition registry and the live store.

use crate::definition::DefinitionRegistry;
use crate::path::Path;
use crate::store::ObjectStore;

/// The link-format body sent with `POST /rd?...` (§6): every live
/// object-instance, sorted for determinism.
pub fn encode_registration(defs: &DefinitionRegistry, store: &ObjectStore) -> String {
    let _ = defs;
    let mut links = Vec::new();
    let mut object_ids = store.object_ids();
    object_ids.sort_unstable();
    for object_id in object_ids {
        let mut instance_ids = store.instance_ids(object_id);
        instance_ids.sort_unstable();
        for instance_id in instance_ids {
            links.push(format!("</{object_id}/{instance_id}>"));
        }
    }
    links.join(",")
}

/// Discover response body for `path` (§4.5 GET with `Accept: link-format`):
/// one level of children below `path`.
pub fn encode_subtree(defs: &DefinitionRegistry, store: &ObjectStore, path: Path) -> String {
    if path.is_root() {
        return encode_registration(defs, store);
    }

    let mut links = Vec::new();
    if path.is_object() {
        let mut instance_ids = store.instance_ids(path.object_id);
        instance_ids.sort_unstable();
        for instance_id in instance_ids {
            links.push(format!("</{}/{instance_id}>", path.object_id));
        }
    } else if path.is_instance() {
        if let Some(def) = defs.lookup_object(path.object_id) {
            for res_def in def.resources() {
                if store.exists(Path::resource(path.object_id, path.object_instance_id, res_def.id)) {
                    links.push(format!("</{}/{}/{}>", path.object_id, path.object_instance_id, res_def.id));
                }
            }
        }
    } else {
        links.push(format!("</{}/{}/{}>", path.object_id, path.object_instance_id, path.resource_id));
    }
    links.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};
    use crate::value::{Value, ValueKind};

    fn defs() -> DefinitionRegistry {
        let mut reg = DefinitionRegistry::with_builtin_objects();
        reg.define_object(
            ObjectDefinition::new(3, "Device", Cardinality::Single, true).with_resource(ResourceDefinition {
                id: 0,
                name: "Manufacturer",
                value_kind: ValueKind::String,
                cardinality: Cardinality::Single,
                mandatory: false,
                operations: Operations::READ_ONLY,
                default: None,
            }),
        )
        .unwrap();
        reg
    }

    #[test]
    fn registration_payload_lists_live_instances() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, crate::server::OBJECT_ID, Some(0)).unwrap();
        store.create_object_instance(&defs, 3, Some(0)).unwrap();

        let body = encode_registration(&defs, &store);
        assert_eq!(body, "</1/0>,</3/0>");
    }

    #[test]
    fn discover_on_instance_lists_present_resources() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 3, Some(0)).unwrap();
        store.set(&defs, 3, 0, 0, 0, Value::String("Acme".into())).unwrap();

        let body = encode_subtree(&defs, &store, Path::instance(3, 0));
        assert_eq!(body, "</3/0/0>");
    }
}
