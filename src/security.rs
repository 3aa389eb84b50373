//! Security object (ID 0, §3a) and the `SecurityRecord` server-credential
//! type (§3), grounded on `core/src/common/lwm2m_objects.h`'s
//! `LWM2M_SECURITY_OBJECT_*` resource IDs.

use crate::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};
use crate::value::ValueKind;

pub const OBJECT_ID: u16 = 0;
pub const RES_SERVER_URI: u16 = 0;
pub const RES_BOOTSTRAP_SERVER: u16 = 1;
pub const RES_SECURITY_MODE: u16 = 2;
pub const RES_PUBLIC_KEY_OR_IDENTITY: u16 = 3;
pub const RES_SERVER_PUBLIC_KEY: u16 = 4;
pub const RES_SECRET_KEY: u16 = 5;
pub const RES_SMS_SECURITY_MODE: u16 = 6;
pub const RES_SMS_BINDING_KEY_PARAMS: u16 = 7;
pub const RES_SMS_BINDING_SECRET_KEYS: u16 = 8;
pub const RES_SMS_NUMBER: u16 = 9;
pub const RES_SHORT_SERVER_ID: u16 = 10;
pub const RES_CLIENT_HOLD_OFF: u16 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Psk,
    RawPublicKey,
    Certificate,
    NoSec,
}

impl SecurityMode {
    pub fn as_i64(self) -> i64 {
        match self {
            SecurityMode::Psk => 0,
            SecurityMode::RawPublicKey => 1,
            SecurityMode::Certificate => 2,
            SecurityMode::NoSec => 3,
        }
    }
}

/// One per configured server (§3). Lives alongside the object store's own
/// Security object-instance; this is the typed view engines reason about.
#[derive(Debug, Clone)]
pub struct SecurityRecord {
    pub object_instance_id: u16,
    pub server_uri: String,
    pub is_bootstrap_server: bool,
    pub security_mode: SecurityMode,
    pub public_key_or_identity: Vec<u8>,
    pub server_public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
    pub sms_number: Option<String>,
    /// Absent when `is_bootstrap_server` is true (§3).
    pub short_server_id: Option<u16>,
    pub client_hold_off_secs: u32,
}

pub fn definition() -> ObjectDefinition {
    ObjectDefinition::new(OBJECT_ID, "LWM2MSecurity", Cardinality::Multiple { max: u16::MAX }, true)
        .with_resource(ResourceDefinition {
            id: RES_SERVER_URI,
            name: "LWM2MServerURI",
            value_kind: ValueKind::String,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_BOOTSTRAP_SERVER,
            name: "BootstrapServer",
            value_kind: ValueKind::Boolean,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_SECURITY_MODE,
            name: "SecurityMode",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_PUBLIC_KEY_OR_IDENTITY,
            name: "PublicKeyOrIdentity",
            value_kind: ValueKind::Opaque,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_SERVER_PUBLIC_KEY,
            name: "ServerPublicKey",
            value_kind: ValueKind::Opaque,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_SECRET_KEY,
            name: "SecretKey",
            value_kind: ValueKind::Opaque,
            cardinality: Cardinality::Single,
            mandatory: true,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_SMS_SECURITY_MODE,
            name: "SMSSecurityMode",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_SMS_BINDING_KEY_PARAMS,
            name: "SMSBindingKeyParameters",
            value_kind: ValueKind::Opaque,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_SMS_BINDING_SECRET_KEYS,
            name: "SMSBindingSecretKeys",
            value_kind: ValueKind::Opaque,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_SMS_NUMBER,
            name: "SMSNumber",
            value_kind: ValueKind::String,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_SHORT_SERVER_ID,
            name: "ShortServerID",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::NONE,
            default: None,
        })
        .with_resource(ResourceDefinition {
            id: RES_CLIENT_HOLD_OFF,
            name: "ClientHoldOffTime",
            value_kind: ValueKind::Integer,
            cardinality: Cardinality::Single,
            mandatory: false,
            operations: Operations::NONE,
            default: None,
        })
}
