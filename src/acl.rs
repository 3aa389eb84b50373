//! Access-Control object (ID 2, §3a) and enforcement (§4.5, §8a), grounded
//! on `core/src/client/lwm2m_acl_object.c`: an instance per controlled
//! `(ObjectID, ObjectInstanceID)`, a multiple-instance ACL resource keyed by
//! short-server-id, and an Access Control Owner that bypasses the mask.

use crate::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};
use crate::value::ValueKind;
use std::collections::HashMap;

pub const OBJECT_ID: u16 = 2;
pub const RES_OBJECT_ID: u16 = 0;
pub const RES_OBJECT_INSTANCE_ID: u16 = 1;
pub const RES_ACL: u16 = 2;
pub const RES_OWNER: u16 = 3;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AclRight: u16 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const EXECUTE = 0b0100;
        const DELETE = 0b1000;
    }
}

/// One Access-Control object-instance: who may do what to
/// `(object_id, object_instance_id)`.
#[derive(Debug, Clone)]
pub struct AccessControlEntry {
    pub object_id: u16,
    pub object_instance_id: u16,
    pub acl: HashMap<u16, AclRight>,
    pub owner_short_server_id: u16,
}

impl AccessControlEntry {
    /// §8a scenarios 7/8: the owner bypasses the mask entirely; an
    /// unlisted server is denied by default rather than inheriting another
    /// server's bits.
    pub fn permits(&self, short_server_id: u16, required: AclRight) -> bool {
        if short_server_id == self.owner_short_server_id {
            return true;
        }
        self.acl.get(&short_server_id).is_some_and(|rights| rights.contains(required))
    }
}

/// Builds the `AccessControlEntry` governing `(object_id, object_instance_id)`
/// from whatever Access-Control instances currently live in the store (§4.5:
/// the ACL object is data, enforcement is a hook the dispatcher calls).
/// `None` means no ACL instance targets this object-instance — the
/// dispatcher then falls back to its own default policy.
pub fn resolve(
    defs: &crate::definition::DefinitionRegistry,
    store: &crate::store::ObjectStore,
    object_id: u16,
    object_instance_id: u16,
) -> Option<AccessControlEntry> {
    for acl_iid in store.instance_ids(OBJECT_ID) {
        let Ok(crate::value::Value::Integer(target_oid)) = store.get(defs, OBJECT_ID, acl_iid, RES_OBJECT_ID, 0)
        else {
            continue;
        };
        let Ok(crate::value::Value::Integer(target_iid)) =
            store.get(defs, OBJECT_ID, acl_iid, RES_OBJECT_INSTANCE_ID, 0)
        else {
            continue;
        };
        if target_oid as u16 != object_id || target_iid as u16 != object_instance_id {
            continue;
        }
        let owner = match store.get(defs, OBJECT_ID, acl_iid, RES_OWNER, 0) {
            Ok(crate::value::Value::Integer(owner)) => owner as u16,
            _ => continue,
        };
        let mut acl = HashMap::new();
        for riid in store.resource_instance_ids(OBJECT_ID, acl_iid, RES_ACL) {
            if let Ok(crate::value::Value::Integer(mask)) = store.get(defs, OBJECT_ID, acl_iid, RES_ACL, riid) {
                acl.insert(riid, AclRight::from_bits_truncate(mask as u16));
            }
        }
        return Some(AccessControlEntry { object_id, object_instance_id, acl, owner_short_server_id: owner });
    }
    None
}

pub fn definition() -> ObjectDefinition {
    ObjectDefinition::new(OBJECT_ID, "LWM2MAccessControl", Cardinality::Multiple { max: u16::MAX }, false)
        .with_resource(ResourceDefinition {
            id: RES_OBJECT_ID,
            name: "ObjectID",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::READ_ONLY,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_OBJECT_INSTANCE_ID,
            name: "ObjectInstanceID",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::READ_ONLY,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_ACL,
            name: "ACL",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Multiple { max: u16::MAX },
            mandatory: false,
            operations: Operations::READ_WRITE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_OWNER,
            name: "AccessControlOwner",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::READ_WRITE,
            default: None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> AccessControlEntry {
        let mut acl = HashMap::new();
        acl.insert(123, AclRight::READ);
        AccessControlEntry { object_id: 10000, object_instance_id: 0, acl, owner_short_server_id: 999 }
    }

    #[test]
    fn unlisted_server_denied_by_default() {
        let e = entry();
        assert!(!e.permits(456, AclRight::READ));
    }

    #[test]
    fn owner_bypasses_mask() {
        let e = entry();
        assert!(e.permits(999, AclRight::WRITE | AclRight::DELETE));
    }

    #[test]
    fn listed_server_restricted_to_its_mask() {
        let e = entry();
        assert!(e.permits(123, AclRight::READ));
        assert!(!e.permits(123, AclRight::WRITE));
    }
}
