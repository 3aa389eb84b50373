//! Payload codecs (C4, §4.4). Each codec encodes a path cursor over the
//! store into a tagged byte buffer, and decodes a byte buffer plus a target
//! path into `(path, typed-value)` tuples. Hand-rolled per content type,
//! following `promql/types.rs::parse_duration`'s char-by-char parsing idiom
//! rather than reaching for a parser-combinator crate.

pub mod json;
pub mod link_format;
pub mod opaque;
pub mod plaintext;
pub mod tlv;

use crate::definition::DefinitionRegistry;
use crate::error::CoreError;
use crate::path::Path;
use crate::store::ObjectStore;
use crate::value::{Value, ValueKind};

/// LwM2M-registered numeric content-format IDs (CoAP `Content-Format`
/// option values), used on the wire and in `Accept` negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    PlainText,
    Opaque,
    Tlv,
    Json,
    LinkFormat,
}

impl ContentFormat {
    pub fn coap_id(self) -> u16 {
        match self {
            ContentFormat::PlainText => 1541,
            ContentFormat::Opaque => 1544,
            ContentFormat::Tlv => 1542,
            ContentFormat::Json => 1543,
            ContentFormat::LinkFormat => 40,
        }
    }

    pub fn from_coap_id(id: u16) -> Option<Self> {
        match id {
            1541 => Some(ContentFormat::PlainText),
            1544 => Some(ContentFormat::Opaque),
            1542 => Some(ContentFormat::Tlv),
            1543 => Some(ContentFormat::Json),
            40 => Some(ContentFormat::LinkFormat),
            _ => None,
        }
    }
}

/// Encodes the sub-tree rooted at `path` using `format`.
pub fn encode(
    format: ContentFormat,
    defs: &DefinitionRegistry,
    store: &ObjectStore,
    path: Path,
) -> Result<Vec<u8>, CoreError> {
    match format {
        ContentFormat::PlainText => plaintext::encode(defs, store, path),
        ContentFormat::Opaque => opaque::encode(defs, store, path),
        ContentFormat::Tlv => tlv::encode(defs, store, path),
        ContentFormat::Json => json::encode(defs, store, path),
        ContentFormat::LinkFormat => Ok(link_format::encode_subtree(defs, store, path).into_bytes()),
    }
}

/// Decodes `bytes` against `target`, producing the paths and values it
/// names. Rejects payloads whose inferred path falls outside `target`
/// (§4.4 round-trip requirement).
pub fn decode(
    format: ContentFormat,
    bytes: &[u8],
    target: Path,
    defs: &DefinitionRegistry,
) -> Result<Vec<(Path, Value)>, CoreError> {
    let entries = match format {
        ContentFormat::PlainText => plaintext::decode(bytes, target, defs)?,
        ContentFormat::Opaque => opaque::decode(bytes, target, defs)?,
        ContentFormat::Tlv => tlv::decode(bytes, target, defs)?,
        ContentFormat::Json => json::decode(bytes, target, defs)?,
        ContentFormat::LinkFormat => {
            return Err(CoreError::UnsupportedContentType(ContentFormat::LinkFormat.coap_id()));
        }
    };
    for (path, _) in &entries {
        if !path_within(target, *path) {
            return Err(CoreError::PayloadMalformed {
                reason: format!("decoded path {path} outside target {target}"),
            });
        }
    }
    Ok(entries)
}

/// Whether `path` is `target` itself or a descendant of it.
fn path_within(target: Path, path: Path) -> bool {
    if target.object_id != crate::path::INVALID_ID && target.object_id != path.object_id {
        return false;
    }
    if target.object_instance_id != crate::path::INVALID_ID
        && target.object_instance_id != path.object_instance_id
    {
        return false;
    }
    if target.resource_id != crate::path::INVALID_ID && target.resource_id != path.resource_id {
        return false;
    }
    if target.resource_instance_id != crate::path::INVALID_ID
        && target.resource_instance_id != path.resource_instance_id
    {
        return false;
    }
    true
}

/// Text encoding shared by plain-text, TLV string bodies, and JSON `sv`/`v`
/// fields. Opaque values have no text representation.
pub(crate) fn value_to_text(path: &Path, v: &Value) -> Result<String, CoreError> {
    if let Value::Opaque(_) = v {
        let _ = path;
        return Err(CoreError::UnsupportedContentType(ContentFormat::PlainText.coap_id()));
    }
    Ok(match v {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        }
        Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Time(t) => t.to_string(),
        Value::ObjectLink(l) => format!("{}:{}", l.object_id, l.object_instance_id),
        Value::Opaque(_) => unreachable!(),
    })
}

pub(crate) fn text_to_value(kind: ValueKind, path: &Path, text: &str) -> Result<Value, CoreError> {
    let malformed = || CoreError::PayloadMalformed {
        reason: format!("cannot parse {text:?} as {kind:?} at {path}"),
    };
    Ok(match kind {
        ValueKind::String => Value::String(text.to_string()),
        ValueKind::Integer => Value::Integer(text.parse::<i64>().map_err(|_| malformed())?),
        ValueKind::Float => Value::Float(text.parse::<f64>().map_err(|_| malformed())?),
        ValueKind::Boolean => match text {
            "0" => Value::Boolean(false),
            "1" => Value::Boolean(true),
            _ => return Err(malformed()),
        },
        ValueKind::Time => Value::Time(text.parse::<i64>().map_err(|_| malformed())?),
        ValueKind::ObjectLink => {
            let (oid, iid) = text.split_once(':').ok_or_else(malformed)?;
            Value::ObjectLink(crate::value::ObjectLink {
                object_id: oid.parse().map_err(|_| malformed())?,
                object_instance_id: iid.parse().map_err(|_| malformed())?,
            })
        }
        ValueKind::Opaque | ValueKind::None => return Err(malformed()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_within_object_matches_any_instance() {
        assert!(path_within(Path::object(3), Path::instance(3, 0)));
        assert!(!path_within(Path::object(3), Path::instance(4, 0)));
    }

    #[test]
    fn text_round_trips_integer() {
        let p = Path::resource(10000, 0, 0);
        let text = value_to_text(&p, &Value::Integer(42)).unwrap();
        assert_eq!(text_to_value(ValueKind::Integer, &p, &text).unwrap(), Value::Integer(42));
    }
}
