//! JSON content format (§4.4): one flat array of `{n, v|sv|bv|ov, t?}`
//! entries with a base-path (`bn`), as specified by the LwM2M JSON content
//! format. Opaque values have no defined JSON representation, matching
//! plain-text's own non-support of that kind.

use crate::definition::{Cardinality, DefinitionRegistry};
use crate::error::CoreError;
use crate::path::Path;
use crate::store::ObjectStore;
use crate::value::{ObjectLink, Value, ValueKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct JsonBody {
    bn: String,
    e: Vec<JsonEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonEntry {
    n: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bv: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ov: Option<String>,
}

fn malformed(reason: impl Into<String>) -> CoreError {
    CoreError::PayloadMalformed { reason: reason.into() }
}

fn value_to_entry(n: String, v: &Value) -> Result<JsonEntry, CoreError> {
    let mut entry = JsonEntry { n, v: None, sv: None, bv: None, ov: None };
    match v {
        Value::String(s) => entry.sv = Some(s.clone()),
        Value::Integer(i) => entry.v = Some(*i as f64),
        Value::Float(f) => entry.v = Some(*f),
        Value::Time(t) => entry.v = Some(*t as f64),
        Value::Boolean(b) => entry.bv = Some(*b),
        Value::ObjectLink(l) => entry.ov = Some(format!("{}:{}", l.object_id, l.object_instance_id)),
        Value::Opaque(_) => return Err(CoreError::UnsupportedContentType(super::ContentFormat::Json.coap_id())),
    }
    Ok(entry)
}

fn entry_to_value(kind: ValueKind, entry: &JsonEntry) -> Result<Value, CoreError> {
    Ok(match kind {
        ValueKind::String => Value::String(entry.sv.clone().ok_or_else(|| malformed("missing sv"))?),
        ValueKind::Integer => Value::Integer(entry.v.ok_or_else(|| malformed("missing v"))? as i64),
        ValueKind::Float => Value::Float(entry.v.ok_or_else(|| malformed("missing v"))?),
        ValueKind::Time => Value::Time(entry.v.ok_or_else(|| malformed("missing v"))? as i64),
        ValueKind::Boolean => Value::Boolean(entry.bv.ok_or_else(|| malformed("missing bv"))?),
        ValueKind::ObjectLink => {
            let ov = entry.ov.as_deref().ok_or_else(|| malformed("missing ov"))?;
            let (oid, iid) = ov.split_once(':').ok_or_else(|| malformed("malformed ov"))?;
            Value::ObjectLink(ObjectLink {
                object_id: oid.parse().map_err(|_| malformed("malformed ov"))?,
                object_instance_id: iid.parse().map_err(|_| malformed("malformed ov"))?,
            })
        }
        ValueKind::Opaque | ValueKind::None => {
            return Err(CoreError::UnsupportedContentType(super::ContentFormat::Json.coap_id()));
        }
    })
}

fn collect_resource(
    defs: &DefinitionRegistry,
    store: &ObjectStore,
    object_id: u16,
    instance_id: u16,
    resource_id: u16,
    prefix: Option<String>,
    out: &mut Vec<JsonEntry>,
) -> Result<(), CoreError> {
    let res_def = defs
        .lookup_resource(object_id, resource_id)
        .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
    match res_def.cardinality {
        Cardinality::Single => {
            let v = store.get(defs, object_id, instance_id, resource_id, 0)?;
            out.push(value_to_entry(prefix.unwrap_or_default(), &v)?);
        }
        Cardinality::Multiple { .. } => {
            for riid in store.resource_instance_ids(object_id, instance_id, resource_id) {
                let v = store.get(defs, object_id, instance_id, resource_id, riid)?;
                let n = match &prefix {
                    Some(p) => format!("{p}/{riid}"),
                    None => riid.to_string(),
                };
                out.push(value_to_entry(n, &v)?);
            }
        }
    }
    Ok(())
}

fn collect_instance(
    defs: &DefinitionRegistry,
    store: &ObjectStore,
    object_id: u16,
    instance_id: u16,
    prefix: Option<String>,
    out: &mut Vec<JsonEntry>,
) -> Result<(), CoreError> {
    let def = defs
        .lookup_object(object_id)
        .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}") })?;
    for res_def in def.resources() {
        if res_def.operations.read && store.exists(Path::resource(object_id, instance_id, res_def.id)) {
            let n = match &prefix {
                Some(p) => format!("{p}/{}", res_def.id),
                None => res_def.id.to_string(),
            };
            collect_resource(defs, store, object_id, instance_id, res_def.id, Some(n), out)?;
        }
    }
    Ok(())
}

pub fn encode(defs: &DefinitionRegistry, store: &ObjectStore, path: Path) -> Result<Vec<u8>, CoreError> {
    let mut entries = Vec::new();
    let bn = if path.is_object() {
        for iid in store.instance_ids(path.object_id) {
            collect_instance(defs, store, path.object_id, iid, Some(iid.to_string()), &mut entries)?;
        }
        format!("/{}/", path.object_id)
    } else if path.is_instance() {
        collect_instance(defs, store, path.object_id, path.object_instance_id, None, &mut entries)?;
        format!("/{}/{}/", path.object_id, path.object_instance_id)
    } else if path.is_resource() {
        collect_resource(defs, store, path.object_id, path.object_instance_id, path.resource_id, None, &mut entries)?;
        format!("/{}/{}/{}/", path.object_id, path.object_instance_id, path.resource_id)
    } else if path.is_resource_instance() {
        let v = store.get(defs, path.object_id, path.object_instance_id, path.resource_id, path.resource_instance_id)?;
        entries.push(value_to_entry(String::new(), &v)?);
        format!("/{}/{}/{}/{}", path.object_id, path.object_instance_id, path.resource_id, path.resource_instance_id)
    } else {
        return Err(CoreError::PathInvalid { path: path.to_string() });
    };

    let body = JsonBody { bn, e: entries };
    serde_json::to_vec(&body).map_err(|e| malformed(format!("failed to serialise JSON body: {e}")))
}

pub fn decode(bytes: &[u8], target: Path, defs: &DefinitionRegistry) -> Result<Vec<(Path, Value)>, CoreError> {
    let body: JsonBody = serde_json::from_slice(bytes).map_err(|e| malformed(format!("bad JSON body: {e}")))?;

    let mut base_ids: Vec<u16> = Vec::new();
    for seg in body.bn.trim_matches('/').split('/') {
        if seg.is_empty() {
            continue;
        }
        base_ids.push(seg.parse().map_err(|_| malformed("bad bn segment"))?);
    }

    let mut out = Vec::with_capacity(body.e.len());
    for entry in &body.e {
        let mut ids = base_ids.clone();
        for seg in entry.n.split('/') {
            if seg.is_empty() {
                continue;
            }
            ids.push(seg.parse().map_err(|_| malformed("bad n segment"))?);
        }
        while ids.len() < 4 {
            ids.push(0);
        }
        if ids.len() != 4 {
            return Err(malformed("bn+n resolved to more than 4 path segments"));
        }
        let path = Path::resource_instance(ids[0], ids[1], ids[2], ids[3]);
        let res_def = defs
            .lookup_resource(path.object_id, path.resource_id)
            .ok_or_else(|| CoreError::NotDefined { path: path.to_string() })?;
        let value = entry_to_value(res_def.value_kind, entry)?;
        let _ = target;
        out.push((path, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ObjectDefinition, Operations, ResourceDefinition};

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
    fn round_trips_single_resource() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 0, 0, Value::Integer(123456789)).unwrap();

        let path = Path::resource(10000, 0, 0);
        let bytes = encode(&defs, &store, path).unwrap();
        let decoded = decode(&bytes, path, &defs).unwrap();
        assert_eq!(decoded, vec![(Path::resource_instance(10000, 0, 0, 0), Value::Integer(123456789))]);
    }

    #[test]
    fn body_shape_matches_base_path_plus_flat_entries() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 0, 0, Value::Integer(5)).unwrap();

        let bytes = encode(&defs, &store, Path::instance(10000, 0)).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"bn\":\"/10000/0/\""));
        assert!(text.contains("\"n\":\"0\""));
    }
}
