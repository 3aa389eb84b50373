//! Server object (ID 1, §3a) and the `ServerRecord` type (§3), grounded on
//! `core/src/common/lwm2m_objects.h`'s `LWM2M_SERVER_OBJECT_*` resource IDs.

use crate::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};
use crate::engines::registration::RegistrationState;
use crate::value::ValueKind;

pub const OBJECT_ID: u16 = 1;
pub const RES_SHORT_SERVER_ID: u16 = 0;
pub const RES_LIFETIME: u16 = 1;
pub const RES_DEFAULT_MIN_PERIOD: u16 = 2;
pub const RES_DEFAULT_MAX_PERIOD: u16 = 3;
pub const RES_DISABLE_TIMEOUT: u16 = 5;
pub const RES_NOTIFICATION_STORING: u16 = 6;
pub const RES_BINDING: u16 = 7;

/// A configured LwM2M server (§3). Identified by a short-server-ID, unique
/// across 1..=65534.
#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub object_instance_id: u16,
    pub short_server_id: u16,
    pub registration_uri: String,
    pub lifetime_secs: u32,
    pub default_min_period_secs: u32,
    pub default_max_period_secs: Option<u32>,
    pub disable_timeout_secs: u32,
    pub notification_storing: bool,
    pub binding: String,
    pub registration_state: RegistrationState,
    pub registration_location: Option<String>,
    /// Set when a Server-object write or local API call asks for an
    /// out-of-cycle registration Update (§4.6.2: "or update flag").
    pub update_requested: bool,
    /// Consecutive failed registration attempts (§4.6.2a), counted across
    /// the whole Register/Registering/RegisterFailedRetry cycle rather than
    /// reset by the transient `Register`/`Registering` states a retry
    /// passes through in between failures.
    pub registration_attempts: u32,
}

impl ServerRecord {
    pub fn new(object_instance_id: u16, short_server_id: u16, registration_uri: String, lifetime_secs: u32) -> Self {
        ServerRecord {
            object_instance_id,
            short_server_id,
            registration_uri,
            lifetime_secs,
            default_min_period_secs: 0,
            default_max_period_secs: None,
            disable_timeout_secs: 86400,
            notification_storing: true,
            binding: "U".to_string(),
            registration_state: RegistrationState::NotRegistered,
            registration_location: None,
            update_requested: false,
            registration_attempts: 0,
        }
    }
}

pub fn definition() -> ObjectDefinition {
    ObjectDefinition::new(OBJECT_ID, "LWM2MServer", Cardinality::Multiple { max: u16::MAX }, true)
        .with_resource(ResourceDefinition {
            id: RES_SHORT_SERVER_ID,
            name: "ShortServerID",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::READ_ONLY,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_LIFETIME,
            name: "Lifetime",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::READ_WRITE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_DEFAULT_MIN_PERIOD,
            name: "DefaultMinimumPeriod",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::READ_WRITE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_DEFAULT_MAX_PERIOD,
            name: "DefaultMaximumPeriod",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::READ_WRITE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_DISABLE_TIMEOUT,
            name: "DisableTimeout",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::READ_WRITE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_NOTIFICATION_STORING,
            name: "NotificationStoringWhenDisabledOrOffline",
            value_kind: ValueKind::Boolean,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::READ_WRITE,
            default: Some(crate::value::Value::Boolean(true)),
        })
        .with_resource(ResourceDefinition {
            id: RES_BINDING,
            name: "Binding",
            value_kind: ValueKind::String,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::READ_WRITE,
            default: None,
        })
}
