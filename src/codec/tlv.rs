//! TLV content format (§4.4): length-prefixed binary, any subtree. Types:
//! object-instance, resource-with-value, multiple-resource, resource-instance.
//! Byte layout follows the OMA TLV encoding used by the wire protocol this
//! client speaks: byte 0 packs type (bits 7-6), ID width (bit 5), and length
//! encoding (bits 4-3 plus an inline 0-7 length in bits 2-0).

use crate::definition::{Cardinality, DefinitionRegistry};
use crate::error::CoreError;
use crate::path::Path;
use crate::store::ObjectStore;
use crate::value::{ObjectLink, Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlvKind {
    ObjectInstance,
    ResourceInstance,
    MultipleResource,
    Resource,
}

impl TlvKind {
    fn bits(self) -> u8 {
        match self {
            TlvKind::ObjectInstance => 0x00,
            TlvKind::ResourceInstance => 0x40,
            TlvKind::MultipleResource => 0x80,
            TlvKind::Resource => 0xC0,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0x00 => TlvKind::ObjectInstance,
            0x40 => TlvKind::ResourceInstance,
            0x80 => TlvKind::MultipleResource,
            _ => TlvKind::Resource,
        }
    }
}

enum TlvValue {
    Bytes(Vec<u8>),
    Nested(Vec<TlvItem>),
}

struct TlvItem {
    kind: TlvKind,
    id: u16,
    value: TlvValue,
}

fn malformed(reason: impl Into<String>) -> CoreError {
    CoreError::PayloadMalformed { reason: reason.into() }
}

fn encode_item(kind: TlvKind, id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    let id_len_bit = if id > 255 { 0x20 } else { 0x00 };
    let len = payload.len();
    let (len_type_bits, inline_len, len_bytes): (u8, u8, Vec<u8>) = if len <= 7 {
        (0x00, len as u8, Vec::new())
    } else if len <= 0xFF {
        (0x08, 0, vec![len as u8])
    } else if len <= 0xFFFF {
        (0x10, 0, (len as u16).to_be_bytes().to_vec())
    } else {
        (0x18, 0, vec![(len >> 16) as u8, (len >> 8) as u8, len as u8])
    };
    out.push(kind.bits() | id_len_bit | len_type_bits | inline_len);
    if id > 255 {
        out.extend_from_slice(&id.to_be_bytes());
    } else {
        out.push(id as u8);
    }
    out.extend_from_slice(&len_bytes);
    out.extend_from_slice(payload);
    out
}

fn parse_items(bytes: &[u8]) -> Result<Vec<TlvItem>, CoreError> {
    let mut items = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (item, tail) = parse_one(rest)?;
        items.push(item);
        rest = tail;
    }
    Ok(items)
}

fn parse_one(bytes: &[u8]) -> Result<(TlvItem, &[u8]), CoreError> {
    let byte0 = *bytes.first().ok_or_else(|| malformed("truncated TLV header"))?;
    let kind = TlvKind::from_bits(byte0 & 0xC0);
    let id_len = if byte0 & 0x20 != 0 { 2 } else { 1 };
    let len_type = (byte0 & 0x18) >> 3;

    let mut pos = 1;
    if bytes.len() < pos + id_len {
        return Err(malformed("truncated TLV id"));
    }
    let id = if id_len == 2 {
        u16::from_be_bytes([bytes[pos], bytes[pos + 1]])
    } else {
        bytes[pos] as u16
    };
    pos += id_len;

    let length = match len_type {
        0 => (byte0 & 0x07) as usize,
        1 => {
            let l = *bytes.get(pos).ok_or_else(|| malformed("truncated TLV length"))? as usize;
            pos += 1;
            l
        }
        2 => {
            if bytes.len() < pos + 2 {
                return Err(malformed("truncated TLV length"));
            }
            let l = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as usize;
            pos += 2;
            l
        }
        _ => {
            if bytes.len() < pos + 3 {
                return Err(malformed("truncated TLV length"));
            }
            let l = ((bytes[pos] as usize) << 16) | ((bytes[pos + 1] as usize) << 8) | bytes[pos + 2] as usize;
            pos += 3;
            l
        }
    };

    if bytes.len() < pos + length {
        return Err(malformed("truncated TLV value"));
    }
    let payload = &bytes[pos..pos + length];
    let value = match kind {
        TlvKind::ObjectInstance | TlvKind::MultipleResource => TlvValue::Nested(parse_items(payload)?),
        TlvKind::Resource | TlvKind::ResourceInstance => TlvValue::Bytes(payload.to_vec()),
    };
    Ok((TlvItem { kind, id, value }, &bytes[pos + length..]))
}

fn int_to_minimal_be(i: i64) -> Vec<u8> {
    if (i8::MIN as i64..=i8::MAX as i64).contains(&i) {
        vec![i as i8 as u8]
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&i) {
        (i as i16).to_be_bytes().to_vec()
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&i) {
        (i as i32).to_be_bytes().to_vec()
    } else {
        i.to_be_bytes().to_vec()
    }
}

fn be_to_i64(bytes: &[u8]) -> Option<i64> {
    match bytes.len() {
        1 => Some(bytes[0] as i8 as i64),
        2 => Some(i16::from_be_bytes(bytes.try_into().ok()?) as i64),
        4 => Some(i32::from_be_bytes(bytes.try_into().ok()?) as i64),
        8 => Some(i64::from_be_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

fn value_to_bytes(v: &Value) -> Result<Vec<u8>, CoreError> {
    Ok(match v {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Integer(i) => int_to_minimal_be(*i),
        Value::Float(f) => f.to_be_bytes().to_vec(),
        Value::Boolean(b) => vec![u8::from(*b)],
        Value::Opaque(b) => b.clone(),
        Value::Time(t) => int_to_minimal_be(*t),
        Value::ObjectLink(l) => {
            let mut out = l.object_id.to_be_bytes().to_vec();
            out.extend_from_slice(&l.object_instance_id.to_be_bytes());
            out
        }
    })
}

fn bytes_to_value(kind: ValueKind, bytes: &[u8]) -> Result<Value, CoreError> {
    Ok(match kind {
        ValueKind::String => {
            Value::String(String::from_utf8(bytes.to_vec()).map_err(|_| malformed("bad utf-8 in TLV string"))?)
        }
        ValueKind::Integer => Value::Integer(be_to_i64(bytes).ok_or_else(|| malformed("bad TLV integer length"))?),
        ValueKind::Float => Value::Float(match bytes.len() {
            4 => f32::from_be_bytes(bytes.try_into().unwrap()) as f64,
            8 => f64::from_be_bytes(bytes.try_into().unwrap()),
            _ => return Err(malformed("bad TLV float length")),
        }),
        ValueKind::Boolean => match bytes {
            [0] => Value::Boolean(false),
            [1] => Value::Boolean(true),
            _ => return Err(malformed("bad TLV boolean encoding")),
        },
        ValueKind::Opaque => Value::Opaque(bytes.to_vec()),
        ValueKind::Time => Value::Time(be_to_i64(bytes).ok_or_else(|| malformed("bad TLV time length"))?),
        ValueKind::ObjectLink => {
            if bytes.len() != 4 {
                return Err(malformed("bad TLV object-link length"));
            }
            Value::ObjectLink(ObjectLink {
                object_id: u16::from_be_bytes([bytes[0], bytes[1]]),
                object_instance_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            })
        }
        ValueKind::None => return Err(malformed("TLV value of type none")),
    })
}

fn encode_resource(
    defs: &DefinitionRegistry,
    store: &ObjectStore,
    object_id: u16,
    instance_id: u16,
    resource_id: u16,
) -> Result<Vec<u8>, CoreError> {
    let res_def = defs
        .lookup_resource(object_id, resource_id)
        .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
    if let Cardinality::Single = res_def.cardinality {
        let v = store.get(defs, object_id, instance_id, resource_id, 0)?;
        Ok(encode_item(TlvKind::Resource, resource_id, &value_to_bytes(&v)?))
    } else {
        let mut children = Vec::new();
        for riid in store.resource_instance_ids(object_id, instance_id, resource_id) {
            let v = store.get(defs, object_id, instance_id, resource_id, riid)?;
            children.extend(encode_item(TlvKind::ResourceInstance, riid, &value_to_bytes(&v)?));
        }
        Ok(encode_item(TlvKind::MultipleResource, resource_id, &children))
    }
}

fn encode_instance_resources(
    defs: &DefinitionRegistry,
    store: &ObjectStore,
    object_id: u16,
    instance_id: u16,
) -> Result<Vec<u8>, CoreError> {
    let def = defs
        .lookup_object(object_id)
        .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}") })?;
    let mut out = Vec::new();
    for res_def in def.resources() {
        if res_def.operations.read && store.exists(Path::resource(object_id, instance_id, res_def.id)) {
            out.extend(encode_resource(defs, store, object_id, instance_id, res_def.id)?);
        }
    }
    Ok(out)
}

pub fn encode(defs: &DefinitionRegistry, store: &ObjectStore, path: Path) -> Result<Vec<u8>, CoreError> {
    if path.is_resource_instance() {
        let v = store.get(defs, path.object_id, path.object_instance_id, path.resource_id, path.resource_instance_id)?;
        return Ok(encode_item(TlvKind::ResourceInstance, path.resource_instance_id, &value_to_bytes(&v)?));
    }
    if path.is_resource() {
        return encode_resource(defs, store, path.object_id, path.object_instance_id, path.resource_id);
    }
    if path.is_instance() {
        return encode_instance_resources(defs, store, path.object_id, path.object_instance_id);
    }
    if path.is_object() {
        let mut out = Vec::new();
        for iid in store.instance_ids(path.object_id) {
            let inner = encode_instance_resources(defs, store, path.object_id, iid)?;
            out.extend(encode_item(TlvKind::ObjectInstance, iid, &inner));
        }
        return Ok(out);
    }
    Err(CoreError::PathInvalid { path: path.to_string() })
}

fn decode_resource_item(
    item: &TlvItem,
    defs: &DefinitionRegistry,
    object_id: u16,
    instance_id: u16,
    out: &mut Vec<(Path, Value)>,
) -> Result<(), CoreError> {
    let resource_id = item.id;
    let res_def = defs
        .lookup_resource(object_id, resource_id)
        .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
    match &item.value {
        TlvValue::Bytes(bytes) => {
            let v = bytes_to_value(res_def.value_kind, bytes)?;
            out.push((Path::resource_instance(object_id, instance_id, resource_id, 0), v));
        }
        TlvValue::Nested(children) => {
            for child in children {
                let TlvValue::Bytes(bytes) = &child.value else {
                    return Err(malformed("multiple-resource child must carry a value"));
                };
                let v = bytes_to_value(res_def.value_kind, bytes)?;
                out.push((Path::resource_instance(object_id, instance_id, resource_id, child.id), v));
            }
        }
    }
    Ok(())
}

pub fn decode(bytes: &[u8], target: Path, defs: &DefinitionRegistry) -> Result<Vec<(Path, Value)>, CoreError> {
    let items = parse_items(bytes)?;
    let mut out = Vec::new();

    if target.is_object() {
        for item in &items {
            let TlvValue::Nested(children) = &item.value else {
                return Err(malformed("expected object-instance TLV at object level"));
            };
            for child in children {
                decode_resource_item(child, defs, target.object_id, item.id, &mut out)?;
            }
        }
    } else if target.is_instance() {
        for item in &items {
            decode_resource_item(item, defs, target.object_id, target.object_instance_id, &mut out)?;
        }
    } else if target.is_resource() {
        let item = items.first().ok_or_else(|| malformed("empty TLV payload for resource write"))?;
        decode_resource_item(item, defs, target.object_id, target.object_instance_id, &mut out)?;
    } else if target.is_resource_instance() {
        let item = items.first().ok_or_else(|| malformed("empty TLV payload for resource-instance write"))?;
        let TlvValue::Bytes(b) = &item.value else {
            return Err(malformed("expected a scalar TLV value"));
        };
        let res_def = defs
            .lookup_resource(target.object_id, target.resource_id)
            .ok_or_else(|| CoreError::NotDefined { path: target.to_string() })?;
        out.push((
            Path::resource_instance(target.object_id, target.object_instance_id, target.resource_id, item.id),
            bytes_to_value(res_def.value_kind, b)?,
        ));
    } else {
        return Err(CoreError::PathInvalid { path: target.to_string() });
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
            ObjectDefinition::new(10000, "Test", Cardinality::Multiple { max: 4 }, false)
                .with_resource(ResourceDefinition {
                    id: 0,
                    name: "Counter",
                    value_kind: ValueKind::Integer,
                    cardinality: Cardinality::Single,
                    mandatory: true,
                    operations: Operations::READ_WRITE,
                    default: None,
                })
                .with_resource(ResourceDefinition {
                    id: 1,
                    name: "Tags",
                    value_kind: ValueKind::String,
                    cardinality: Cardinality::Multiple { max: 8 },
                    mandatory: false,
                    operations: Operations::READ_WRITE,
                    default: None,
                }),
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
    fn round_trips_multiple_resource() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 1, 0, Value::String("a".into())).unwrap();
        store.set(&defs, 10000, 0, 1, 3, Value::String("b".into())).unwrap();

        let path = Path::resource(10000, 0, 1);
        let bytes = encode(&defs, &store, path).unwrap();
        let mut decoded = decode(&bytes, path, &defs).unwrap();
        decoded.sort_by_key(|(p, _)| p.resource_instance_id);
        assert_eq!(
            decoded,
            vec![
                (Path::resource_instance(10000, 0, 1, 0), Value::String("a".into())),
                (Path::resource_instance(10000, 0, 1, 3), Value::String("b".into())),
            ]
        );
    }

    #[test]
    fn round_trips_whole_instance() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 0, 0, Value::Integer(7)).unwrap();
        store.set(&defs, 10000, 0, 1, 0, Value::String("a".into())).unwrap();

        let path = Path::instance(10000, 0);
        let bytes = encode(&defs, &store, path).unwrap();
        let decoded = decode(&bytes, path, &defs).unwrap();
        assert!(decoded.contains(&(Path::resource_instance(10000, 0, 0, 0), Value::Integer(7))));
        assert!(decoded.contains(&(Path::resource_instance(10000, 0, 1, 0), Value::String("a".into()))));
    }
}
