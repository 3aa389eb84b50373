//! Attribute store (C3, §4.3). Per-`(server, path)` notification attributes
//! with resolution from resource up to object and server default. The
//! comparison-operator `match` shape here follows `query_builder.rs`'s
//! typed-operator dispatch, applied to numeric gt/lt/st evaluation instead
//! of SQL predicates.

use crate::error::CoreError;
use crate::path::Path;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeKey {
    Pmin,
    Pmax,
    Gt,
    Lt,
    St,
}

/// A single `(server, path)` entry's attributes as written; `None` means
/// "not set at this level" (§4.3 resolution walks up to find a value).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AttributeValues {
    pub pmin: Option<u32>,
    pub pmax: Option<u32>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub st: Option<f64>,
    pub cancel: bool,
}

impl AttributeValues {
    fn set(&mut self, key: AttributeKey, value: f64) {
        match key {
            AttributeKey::Pmin => self.pmin = Some(value as u32),
            AttributeKey::Pmax => self.pmax = Some(value as u32),
            AttributeKey::Gt => self.gt = Some(value),
            AttributeKey::Lt => self.lt = Some(value),
            AttributeKey::St => self.st = Some(value),
        }
    }

    fn clear(&mut self, key: AttributeKey) {
        match key {
            AttributeKey::Pmin => self.pmin = None,
            AttributeKey::Pmax => self.pmax = None,
            AttributeKey::Gt => self.gt = None,
            AttributeKey::Lt => self.lt = None,
            AttributeKey::St => self.st = None,
        }
    }
}

/// A fully-resolved attribute set for one `(server, path)` evaluation (§3,
/// §4.3). `pmin` defaults to 0, `pmax` to unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeSet {
    pub pmin_secs: u32,
    pub pmax_secs: Option<u32>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub st: Option<f64>,
}

impl Default for AttributeSet {
    fn default() -> Self {
        AttributeSet { pmin_secs: 0, pmax_secs: None, gt: None, lt: None, st: None }
    }
}

/// C3: per-server write-attribute storage, one `AttributeValues` per level
/// actually written to.
#[derive(Default)]
pub struct AttributeStore {
    entries: HashMap<(u16, Path), AttributeValues>,
}

impl AttributeStore {
    pub fn new() -> Self {
        AttributeStore { entries: HashMap::new() }
    }

    /// Validates and applies a single attribute write (§4.3 validation
    /// rules). `is_numeric` tells the validator whether the target resource
    /// is a numeric type, since gt/lt/st are rejected on non-numeric ones.
    pub fn set(
        &mut self,
        server: u16,
        path: Path,
        key: AttributeKey,
        value: f64,
        is_numeric: bool,
    ) -> Result<(), CoreError> {
        if matches!(key, AttributeKey::Gt | AttributeKey::Lt | AttributeKey::St) && !is_numeric {
            return Err(CoreError::PayloadMalformed {
                reason: format!("{key:?} is not valid on a non-numeric resource"),
            });
        }
        if key == AttributeKey::St && value < 0.0 {
            return Err(CoreError::PayloadMalformed { reason: "st must be >= 0".to_string() });
        }

        let mut candidate = self.entries.get(&(server, path)).copied().unwrap_or_default();
        candidate.set(key, value);

        let resolved = self.resolve_with_override(server, path, candidate);
        if let Some(pmax) = resolved.pmax_secs {
            if resolved.pmin_secs > pmax {
                return Err(CoreError::PayloadMalformed { reason: "pmin must be <= pmax".to_string() });
            }
        }
        if let (Some(lt), Some(gt)) = (resolved.lt, resolved.gt) {
            if lt >= gt {
                return Err(CoreError::PayloadMalformed { reason: "lt must be < gt".to_string() });
            }
        }

        self.entries.insert((server, path), candidate);
        Ok(())
    }

    pub fn clear(&mut self, server: u16, path: Path, key: AttributeKey) {
        if let Some(values) = self.entries.get_mut(&(server, path)) {
            values.clear(key);
        }
    }

    pub fn set_cancel(&mut self, server: u16, path: Path, cancel: bool) {
        let entry = self.entries.entry((server, path)).or_default();
        entry.cancel = cancel;
    }

    pub fn is_cancelled(&self, server: u16, path: Path) -> bool {
        self.entries.get(&(server, path)).is_some_and(|v| v.cancel)
    }

    /// Resolution order: resource attrs -> object-instance attrs -> object
    /// attrs -> server defaults (§3, §4.3). Pure: never mutates the store.
    pub fn resolve(&self, server: u16, path: Path) -> AttributeSet {
        self.resolve_with_override(server, path, AttributeValues::default())
    }

    fn resolve_with_override(&self, server: u16, path: Path, most_specific: AttributeValues) -> AttributeSet {
        let mut levels = vec![path];
        if path.resource_id != crate::path::INVALID_ID {
            levels.push(Path::resource(path.object_id, path.object_instance_id, path.resource_id));
        }
        levels.push(Path::instance(path.object_id, path.object_instance_id));
        levels.push(Path::object(path.object_id));
        levels.dedup();

        let mut result = AttributeSet::default();
        let mut pmin_set = false;
        let mut pmax_set = false;

        let candidates = std::iter::once(most_specific)
            .chain(levels.into_iter().filter_map(|p| self.entries.get(&(server, p)).copied()));

        for values in candidates {
            if !pmin_set {
                if let Some(pmin) = values.pmin {
                    result.pmin_secs = pmin;
                    pmin_set = true;
                }
            }
            if !pmax_set {
                if let Some(pmax) = values.pmax {
                    result.pmax_secs = Some(pmax);
                    pmax_set = true;
                }
            }
            if result.gt.is_none() {
                result.gt = values.gt;
            }
            if result.lt.is_none() {
                result.lt = values.lt;
            }
            if result.st.is_none() {
                result.st = values.st;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_falls_back_from_resource_to_object() {
        let mut store = AttributeStore::new();
        store.set(123, Path::object(3), AttributeKey::Pmin, 10.0, false).unwrap();
        let resolved = store.resolve(123, Path::resource(3, 0, 13));
        assert_eq!(resolved.pmin_secs, 10);
    }

    #[test]
    fn more_specific_value_wins() {
        let mut store = AttributeStore::new();
        store.set(123, Path::object(3), AttributeKey::Pmin, 10.0, false).unwrap();
        store.set(123, Path::resource(3, 0, 13), AttributeKey::Pmin, 2.0, false).unwrap();
        let resolved = store.resolve(123, Path::resource(3, 0, 13));
        assert_eq!(resolved.pmin_secs, 2);
    }

    #[test]
    fn pmin_greater_than_pmax_rejected() {
        let mut store = AttributeStore::new();
        store.set(123, Path::resource(3, 0, 13), AttributeKey::Pmax, 5.0, false).unwrap();
        let err = store.set(123, Path::resource(3, 0, 13), AttributeKey::Pmin, 10.0, false).unwrap_err();
        assert!(matches!(err, CoreError::PayloadMalformed { .. }));
    }

    #[test]
    fn gt_lt_st_rejected_on_non_numeric() {
        let mut store = AttributeStore::new();
        let err = store.set(123, Path::resource(3, 0, 13), AttributeKey::Gt, 1.0, false).unwrap_err();
        assert!(matches!(err, CoreError::PayloadMalformed { .. }));
    }

    #[test]
    fn lt_must_be_less_than_gt() {
        let mut store = AttributeStore::new();
        store.set(123, Path::resource(3, 0, 13), AttributeKey::Gt, 5.0, true).unwrap();
        let err = store.set(123, Path::resource(3, 0, 13), AttributeKey::Lt, 10.0, true).unwrap_err();
        assert!(matches!(err, CoreError::PayloadMalformed { .. }));
    }
}
