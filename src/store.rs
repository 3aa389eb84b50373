//! Object store and object tree (C2, §4.2). Holds live instances keyed by
//! `(ObjectID, ObjectInstanceID, ResourceID, ResourceInstanceID)`. The whole
//! tree is owned by one `ObjectStore`; the single-threaded discipline (§5)
//! is its locking policy — there is no interior mutability here.

use crate::definition::{Cardinality, DefinitionRegistry};
use crate::error::CoreError;
use crate::path::{Path, INVALID_ID};
use crate::value::Value;
use std::collections::BTreeMap;

/// A resource's live values. `Single` always addresses resource-instance 0;
/// `Multiple` is sparsely indexed up to the definition's max cardinality
/// (§3: "array resources may carry sparsely-indexed instances").
#[derive(Debug, Clone)]
pub enum ResourceValues {
    Single(Option<Value>),
    Multiple(BTreeMap<u16, Value>),
}

impl ResourceValues {
    fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::Single => ResourceValues::Single(None),
            Cardinality::Multiple { .. } => ResourceValues::Multiple(BTreeMap::new()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectInstance {
    resources: BTreeMap<u16, ResourceValues>,
}

/// How a write addressing a whole object-instance treats resources it does
/// not mention (§4.2 rule 2, §4.2a).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Deletes existing optional resources not named in the payload, then
    /// applies the payload.
    Replace,
    /// Per-resource merge: a resource-instance present in the payload is
    /// written or created; anything else, named or not, is untouched.
    Update,
}

/// C2: the object store. One per running client; the single mutable shared
/// structure per §5.
#[derive(Default)]
pub struct ObjectStore {
    objects: BTreeMap<u16, BTreeMap<u16, ObjectInstance>>,
    change_events: Vec<Path>,
}

impl ObjectStore {
    pub fn new() -> Self {
        ObjectStore { objects: BTreeMap::new(), change_events: Vec::new() }
    }

    /// Drains the change-event queue emitted by successful mutations since
    /// the last drain; consumed by the observation engine (§4.2, §4.6.3).
    pub fn drain_change_events(&mut self) -> Vec<Path> {
        std::mem::take(&mut self.change_events)
    }

    fn record_change(&mut self, path: Path) {
        self.change_events.push(path);
    }

    pub fn create_object_instance(
        &mut self,
        defs: &DefinitionRegistry,
        object_id: u16,
        instance_id: Option<u16>,
    ) -> Result<u16, CoreError> {
        let def = defs
            .lookup_object(object_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}") })?;

        let instances = self.objects.entry(object_id).or_default();

        let iid = match instance_id {
            Some(id) => id,
            // §4.2 rule 3: smallest free ID >= 0.
            None => (0..=crate::path::MAX_ID).find(|id| !instances.contains_key(id)).ok_or_else(
                || CoreError::CardinalityExceeded { path: format!("/{object_id}") },
            )?,
        };

        if instances.contains_key(&iid) {
            return Err(CoreError::AlreadyExists { path: format!("/{object_id}/{iid}") });
        }

        if let Cardinality::Single = def.cardinality {
            if !instances.is_empty() {
                return Err(CoreError::CardinalityExceeded { path: format!("/{object_id}") });
            }
        }
        if let Cardinality::Multiple { max } = def.cardinality {
            if instances.len() as u32 >= max as u32 {
                return Err(CoreError::CardinalityExceeded { path: format!("/{object_id}") });
            }
        }

        let mut instance = ObjectInstance::default();
        for res in def.resources() {
            if res.mandatory {
                instance.resources.insert(
                    res.id,
                    match res.cardinality {
                        Cardinality::Single => ResourceValues::Single(res.default.clone()),
                        Cardinality::Multiple { .. } => ResourceValues::empty(res.cardinality),
                    },
                );
            }
        }
        instances.insert(iid, instance);
        self.record_change(Path::instance(object_id, iid));
        Ok(iid)
    }

    pub fn create_optional_resource(
        &mut self,
        defs: &DefinitionRegistry,
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
    ) -> Result<(), CoreError> {
        let res_def = defs
            .lookup_resource(object_id, resource_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
        let instance = self.instance_mut(object_id, instance_id)?;
        if instance.resources.contains_key(&resource_id) {
            return Ok(());
        }
        let handler = defs.lookup_object(object_id).unwrap().handler(resource_id);
        let values = match res_def.cardinality {
            Cardinality::Single => {
                let v = handler.create_optional().unwrap_or_else(|_| res_def.default.clone().unwrap_or_else(|| default_for(res_def.value_kind)));
                ResourceValues::Single(Some(v))
            }
            Cardinality::Multiple { .. } => ResourceValues::empty(res_def.cardinality),
        };
        instance.resources.insert(resource_id, values);
        self.record_change(Path::resource(object_id, instance_id, resource_id));
        Ok(())
    }

    fn instance(&self, object_id: u16, instance_id: u16) -> Result<&ObjectInstance, CoreError> {
        self.objects
            .get(&object_id)
            .and_then(|m| m.get(&instance_id))
            .ok_or_else(|| CoreError::PathNotFound { path: format!("/{object_id}/{instance_id}") })
    }

    fn instance_mut(&mut self, object_id: u16, instance_id: u16) -> Result<&mut ObjectInstance, CoreError> {
        self.objects
            .get_mut(&object_id)
            .and_then(|m| m.get_mut(&instance_id))
            .ok_or_else(|| CoreError::PathNotFound { path: format!("/{object_id}/{instance_id}") })
    }

    pub fn exists(&self, path: Path) -> bool {
        if path.is_root() {
            return !self.objects.is_empty();
        }
        let Some(instances) = self.objects.get(&path.object_id) else { return false };
        if path.is_object() {
            return !instances.is_empty();
        }
        let Some(instance) = instances.get(&path.object_instance_id) else { return false };
        if path.is_instance() {
            return true;
        }
        let Some(values) = instance.resources.get(&path.resource_id) else { return false };
        if path.is_resource() {
            return true;
        }
        match values {
            ResourceValues::Single(v) => path.resource_instance_id == 0 && v.is_some(),
            ResourceValues::Multiple(m) => m.contains_key(&path.resource_instance_id),
        }
    }

    /// §4.2 rule 5: a single-instance resource implicitly uses
    /// resource-instance 0; a non-zero explicit index on it is a path error.
    fn resolve_riid(values: &ResourceValues, riid: u16) -> Result<u16, CoreError> {
        match values {
            ResourceValues::Single(_) => {
                let effective = if riid == INVALID_ID { 0 } else { riid };
                if effective != 0 {
                    return Err(CoreError::PathInvalid { path: format!("riid={riid}") });
                }
                Ok(0)
            }
            ResourceValues::Multiple(_) => Ok(riid),
        }
    }

    pub fn get(
        &self,
        defs: &DefinitionRegistry,
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
        resource_instance_id: u16,
    ) -> Result<Value, CoreError> {
        let def = defs
            .lookup_object(object_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}") })?;
        let res_def = def
            .resource(resource_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
        if !res_def.operations.read {
            return Err(CoreError::MethodNotAllowed {
                path: format!("/{object_id}/{instance_id}/{resource_id}"),
            });
        }
        let instance = self.instance(object_id, instance_id)?;
        let values = instance.resources.get(&resource_id).ok_or_else(|| CoreError::PathNotFound {
            path: format!("/{object_id}/{instance_id}/{resource_id}"),
        })?;
        let riid = Self::resolve_riid(values, resource_instance_id)?;
        let current = match values {
            ResourceValues::Single(v) => v.as_ref(),
            ResourceValues::Multiple(m) => m.get(&riid),
        };
        let handler = def.handler(resource_id);
        handler.read(current)?.ok_or_else(|| CoreError::PathNotFound {
            path: format!("/{object_id}/{instance_id}/{resource_id}/{riid}"),
        })
    }

    pub fn set(
        &mut self,
        defs: &DefinitionRegistry,
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
        resource_instance_id: u16,
        value: Value,
    ) -> Result<(), CoreError> {
        let def = defs
            .lookup_object(object_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}") })?;
        let res_def = def
            .resource(resource_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
        if !res_def.operations.write {
            return Err(CoreError::MethodNotAllowed {
                path: format!("/{object_id}/{instance_id}/{resource_id}"),
            });
        }
        if value.kind() != res_def.value_kind {
            return Err(CoreError::TypeMismatch {
                path: format!("/{object_id}/{instance_id}/{resource_id}"),
                expected: res_def.value_kind,
                found: value.kind(),
            });
        }
        let handler = def.handler(resource_id);
        let value = handler.write(value)?;

        let cardinality = res_def.cardinality;
        let instance = self.instance_mut(object_id, instance_id)?;
        let values = instance
            .resources
            .entry(resource_id)
            .or_insert_with(|| ResourceValues::empty(cardinality));
        let riid = Self::resolve_riid(values, resource_instance_id)?;
        match values {
            ResourceValues::Single(slot) => *slot = Some(value),
            ResourceValues::Multiple(m) => {
                if let Cardinality::Multiple { max } = cardinality {
                    if !m.contains_key(&riid) && m.len() as u32 >= max as u32 {
                        return Err(CoreError::CardinalityExceeded {
                            path: format!("/{object_id}/{instance_id}/{resource_id}"),
                        });
                    }
                }
                m.insert(riid, value);
            }
        }
        self.record_change(Path::resource_instance(object_id, instance_id, resource_id, riid));
        Ok(())
    }

    /// Reads a resource ignoring its declared Operations (§4.6.1: the
    /// Bootstrap interface and the engines that consume Security/Server
    /// object data read resources the Device-Management interface marks
    /// `Operations::NONE`).
    pub fn get_bootstrap(
        &self,
        defs: &DefinitionRegistry,
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
        resource_instance_id: u16,
    ) -> Result<Value, CoreError> {
        let def = defs
            .lookup_object(object_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}") })?;
        def.resource(resource_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
        let instance = self.instance(object_id, instance_id)?;
        let values = instance.resources.get(&resource_id).ok_or_else(|| CoreError::PathNotFound {
            path: format!("/{object_id}/{instance_id}/{resource_id}"),
        })?;
        let riid = Self::resolve_riid(values, resource_instance_id)?;
        let current = match values {
            ResourceValues::Single(v) => v.as_ref(),
            ResourceValues::Multiple(m) => m.get(&riid),
        };
        current.cloned().ok_or_else(|| CoreError::PathNotFound {
            path: format!("/{object_id}/{instance_id}/{resource_id}/{riid}"),
        })
    }

    /// Writes a resource ignoring its declared Operations, same bypass as
    /// [`Self::get_bootstrap`]. Still type-checks against the definition.
    pub fn set_bootstrap(
        &mut self,
        defs: &DefinitionRegistry,
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
        resource_instance_id: u16,
        value: Value,
    ) -> Result<(), CoreError> {
        let def = defs
            .lookup_object(object_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}") })?;
        let res_def = def
            .resource(resource_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
        if value.kind() != res_def.value_kind {
            return Err(CoreError::TypeMismatch {
                path: format!("/{object_id}/{instance_id}/{resource_id}"),
                expected: res_def.value_kind,
                found: value.kind(),
            });
        }
        let cardinality = res_def.cardinality;
        let instance = self.instance_mut(object_id, instance_id)?;
        let values = instance
            .resources
            .entry(resource_id)
            .or_insert_with(|| ResourceValues::empty(cardinality));
        let riid = Self::resolve_riid(values, resource_instance_id)?;
        match values {
            ResourceValues::Single(slot) => *slot = Some(value),
            ResourceValues::Multiple(m) => {
                m.insert(riid, value);
            }
        }
        self.record_change(Path::resource_instance(object_id, instance_id, resource_id, riid));
        Ok(())
    }

    pub fn execute(
        &mut self,
        defs: &DefinitionRegistry,
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
        args: &[u8],
    ) -> Result<(), CoreError> {
        let def = defs
            .lookup_object(object_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}") })?;
        let res_def = def
            .resource(resource_id)
            .ok_or_else(|| CoreError::NotDefined { path: format!("/{object_id}/{resource_id}") })?;
        if !res_def.operations.execute {
            return Err(CoreError::MethodNotAllowed {
                path: format!("/{object_id}/{instance_id}/{resource_id}"),
            });
        }
        // An instance must exist for its resources to be addressable at all.
        self.instance(object_id, instance_id)?;
        def.handler(resource_id).execute(args)
    }

    /// Writes a whole object-instance per §4.2 rule 2 / §4.2a. Creates the
    /// instance first if it does not exist.
    pub fn write_instance(
        &mut self,
        defs: &DefinitionRegistry,
        object_id: u16,
        instance_id: u16,
        mode: WriteMode,
        payload: &[(u16, u16, Value)],
    ) -> Result<(), CoreError> {
        if !self.exists(Path::instance(object_id, instance_id)) {
            self.create_object_instance(defs, object_id, Some(instance_id))?;
        }

        if mode == WriteMode::Replace {
            let def = defs.lookup_object(object_id).unwrap();
            let named_resources: std::collections::HashSet<u16> =
                payload.iter().map(|(rid, _, _)| *rid).collect();
            let optional_ids: Vec<u16> = def
                .resources()
                .filter(|r| !r.mandatory)
                .map(|r| r.id)
                .filter(|rid| !named_resources.contains(rid))
                .collect();
            let instance = self.instance_mut(object_id, instance_id)?;
            for rid in optional_ids {
                instance.resources.remove(&rid);
            }
        }

        for (rid, riid, value) in payload {
            self.set(defs, object_id, instance_id, *rid, *riid, value.clone())?;
        }
        Ok(())
    }

    /// Deletes an object-instance, or every instance under `/` except the
    /// bootstrap security record (§4.2 rule 4), bootstrap-only.
    pub fn delete(&mut self, path: Path, preserve_bootstrap_security: bool) -> Result<(), CoreError> {
        if path.is_root() {
            if preserve_bootstrap_security {
                if let Some(sec) = self.objects.get_mut(&crate::security::OBJECT_ID) {
                    sec.retain(|_, inst| {
                        matches!(
                            inst.resources.get(&crate::security::RES_BOOTSTRAP_SERVER),
                            Some(ResourceValues::Single(Some(Value::Boolean(true))))
                        )
                    });
                }
                let security = self.objects.remove(&crate::security::OBJECT_ID);
                self.objects.clear();
                if let Some(security) = security {
                    if !security.is_empty() {
                        self.objects.insert(crate::security::OBJECT_ID, security);
                    }
                }
            } else {
                self.objects.clear();
            }
            self.record_change(Path::parse("/").unwrap());
            return Ok(());
        }

        if path.is_instance() {
            let instances = self
                .objects
                .get_mut(&path.object_id)
                .ok_or_else(|| CoreError::PathNotFound { path: path.to_string() })?;
            instances
                .remove(&path.object_instance_id)
                .ok_or_else(|| CoreError::PathNotFound { path: path.to_string() })?;
            self.record_change(path);
            return Ok(());
        }

        Err(CoreError::PathInvalid { path: path.to_string() })
    }

    pub fn next_object_id(&self, after: u16) -> Option<u16> {
        self.objects.keys().copied().filter(|id| *id > after).min()
    }

    pub fn next_instance_id(&self, object_id: u16, after: u16) -> Option<u16> {
        self.objects.get(&object_id)?.keys().copied().filter(|id| *id > after).min()
    }

    pub fn next_resource_id(&self, object_id: u16, instance_id: u16, after: u16) -> Option<u16> {
        self.objects
            .get(&object_id)?
            .get(&instance_id)?
            .resources
            .keys()
            .copied()
            .filter(|id| *id > after)
            .min()
    }

    pub fn next_resource_instance_id(
        &self,
        object_id: u16,
        instance_id: u16,
        resource_id: u16,
        after: u16,
    ) -> Option<u16> {
        match self.objects.get(&object_id)?.get(&instance_id)?.resources.get(&resource_id)? {
            ResourceValues::Single(_) => None,
            ResourceValues::Multiple(m) => m.keys().copied().filter(|id| *id > after).min(),
        }
    }

    pub fn instance_ids(&self, object_id: u16) -> Vec<u16> {
        self.objects.get(&object_id).map(|m| m.keys().copied().collect()).unwrap_or_default()
    }

    pub fn object_ids(&self) -> Vec<u16> {
        self.objects.keys().copied().collect()
    }

    pub fn resource_instance_ids(&self, object_id: u16, instance_id: u16, resource_id: u16) -> Vec<u16> {
        match self.objects.get(&object_id).and_then(|m| m.get(&instance_id)).and_then(|i| i.resources.get(&resource_id)) {
            Some(ResourceValues::Single(Some(_))) => vec![0],
            Some(ResourceValues::Single(None)) | None => Vec::new(),
            Some(ResourceValues::Multiple(m)) => m.keys().copied().collect(),
        }
    }
}

fn default_for(kind: crate::value::ValueKind) -> Value {
    use crate::value::ValueKind;
    match kind {
        ValueKind::String => Value::String(String::new()),
        ValueKind::Integer => Value::Integer(0),
        ValueKind::Float => Value::Float(0.0),
        ValueKind::Boolean => Value::Boolean(false),
        ValueKind::Opaque => Value::Opaque(Vec::new()),
        ValueKind::Time => Value::Time(0),
        ValueKind::ObjectLink => {
            Value::ObjectLink(crate::value::ObjectLink { object_id: INVALID_ID, object_instance_id: INVALID_ID })
        }
        ValueKind::None => Value::Boolean(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};
    use crate::value::ValueKind;

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
    fn write_then_read_integer() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 0, 0, Value::Integer(123456789)).unwrap();
        let v = store.get(&defs, 10000, 0, 0, 0).unwrap();
        assert_eq!(v, Value::Integer(123456789));
    }

    #[test]
    fn type_mismatch_rejected_without_mutation() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        let err = store.set(&defs, 10000, 0, 0, 0, Value::String("x".into())).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        assert!(store.get(&defs, 10000, 0, 0, 0).is_err());
    }

    #[test]
    fn nonzero_riid_on_single_resource_is_path_invalid() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        let err = store.set(&defs, 10000, 0, 0, 3, Value::Integer(1)).unwrap_err();
        assert!(matches!(err, CoreError::PathInvalid { .. }));
    }

    #[test]
    fn create_at_object_picks_smallest_free_id() {
        let defs = defs();
        let mut store = ObjectStore::new();
        let a = store.create_object_instance(&defs, 10000, None).unwrap();
        let b = store.create_object_instance(&defs, 10000, None).unwrap();
        assert_eq!((a, b), (0, 1));
        store.delete(Path::instance(10000, 0), false).unwrap();
        let c = store.create_object_instance(&defs, 10000, None).unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn cardinality_exceeded_on_too_many_instances() {
        let defs = defs();
        let mut store = ObjectStore::new();
        for _ in 0..4 {
            store.create_object_instance(&defs, 10000, None).unwrap();
        }
        let err = store.create_object_instance(&defs, 10000, None).unwrap_err();
        assert!(matches!(err, CoreError::CardinalityExceeded { .. }));
    }

    #[test]
    fn update_mode_merges_without_clearing_unmentioned_instances() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 1, 0, Value::String("a".into())).unwrap();
        store.set(&defs, 10000, 0, 1, 1, Value::String("b".into())).unwrap();

        store
            .write_instance(&defs, 10000, 0, WriteMode::Update, &[(1, 2, Value::String("c".into()))])
            .unwrap();

        assert_eq!(store.get(&defs, 10000, 0, 1, 0).unwrap(), Value::String("a".into()));
        assert_eq!(store.get(&defs, 10000, 0, 1, 1).unwrap(), Value::String("b".into()));
        assert_eq!(store.get(&defs, 10000, 0, 1, 2).unwrap(), Value::String("c".into()));
    }

    #[test]
    fn delete_root_preserves_bootstrap_security_instance() {
        let reg = DefinitionRegistry::with_builtin_objects();
        let mut store = ObjectStore::new();
        let sec0 = store.create_object_instance(&reg, crate::security::OBJECT_ID, Some(0)).unwrap();
        store
            .set(&reg, crate::security::OBJECT_ID, sec0, crate::security::RES_BOOTSTRAP_SERVER, 0, Value::Boolean(true))
            .unwrap();
        store.create_object_instance(&reg, 10000, Some(0)).ok();
        store.create_object_instance(&reg, crate::server::OBJECT_ID, Some(0)).unwrap();

        store.delete(Path::parse("/").unwrap(), true).unwrap();

        assert!(store.exists(Path::instance(crate::security::OBJECT_ID, sec0)));
        assert!(!store.exists(Path::instance(crate::server::OBJECT_ID, 0)));
    }
}
