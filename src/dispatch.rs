//! Request dispatcher (C5, §4.5). Maps an inbound CoAP method + path onto
//! C2/C3/C6.3 operations and back onto a CoAP response code, the way
//! `handlers/alerts.rs` extracts request state, calls into the store, and
//! maps the result to an HTTP status — generalized here from HTTP status
//! codes to CoAP response codes (§7's single translator between the two
//! error taxonomies).

use crate::acl::{self, AclRight};
use crate::attributes::{AttributeKey, AttributeStore};
use crate::codec::{self, ContentFormat};
use crate::definition::DefinitionRegistry;
use crate::engines::observation::ObservationEngine;
use crate::error::CoreError;
use crate::path::{Path, INVALID_ID};
use crate::store::{ObjectStore, WriteMode};
use crate::transport::{CoapMethod, ResponseCode};
use crate::value::Value;

/// What an inbound GET asks for beyond a plain read (§4.6.3's Observe
/// registration, and its cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOption {
    Register,
    Cancel,
}

/// One inbound CoAP request, already parsed onto a [`Path`] by the
/// transport layer (out of scope here per §1 — only the post-parse shape
/// is this component's concern).
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub short_server_id: u16,
    pub method: CoapMethod,
    pub path: Path,
    pub content_format: Option<ContentFormat>,
    pub accept: Option<ContentFormat>,
    pub observe: Option<ObserveOption>,
    pub payload: Vec<u8>,
    pub token: Vec<u8>,
    /// True only for the bootstrap interface's own Write/Delete calls
    /// (§4.5: "Bootstrap-server writes bypass ACL and may target the
    /// Security object").
    pub is_bootstrap: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchResponse {
    pub code: ResponseCode,
    pub content_format: Option<ContentFormat>,
    pub payload: Vec<u8>,
    pub location_path: Option<String>,
    pub observe_registered: bool,
}

impl Default for ResponseCode {
    fn default() -> Self {
        ResponseCode::INTERNAL_SERVER_ERROR
    }
}

fn response_code_for(err: &CoreError) -> ResponseCode {
    match err {
        CoreError::PathNotFound { .. } | CoreError::NotDefined { .. } => ResponseCode::NOT_FOUND,
        CoreError::PathInvalid { .. }
        | CoreError::TypeMismatch { .. }
        | CoreError::PayloadMalformed { .. }
        | CoreError::AlreadyExists { .. }
        | CoreError::DefinitionInvalid { .. } => ResponseCode::BAD_REQUEST,
        CoreError::MethodNotAllowed { .. } | CoreError::CardinalityExceeded { .. } => {
            ResponseCode::METHOD_NOT_ALLOWED
        }
        CoreError::AccessDenied { .. } => ResponseCode::UNAUTHORIZED,
        CoreError::UnsupportedContentType(_) => ResponseCode::UNSUPPORTED_CONTENT_FORMAT,
        CoreError::Timeout { .. } | CoreError::Transport(_) | CoreError::Internal(_) => {
            ResponseCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn err_response(err: CoreError) -> DispatchResponse {
    tracing::debug!(code = %response_code_for(&err).as_dotted(), "dispatch error: {err}");
    DispatchResponse { code: response_code_for(&err), ..Default::default() }
}

/// §4.5: "consult the ACL object for the originating short-server-ID."
/// Bootstrap writers bypass this entirely. An object-instance with no
/// Access-Control instance governing it has no enforcement to apply — the
/// ACL object is opt-in data (§1: "the ACL object is in scope only as
/// data; enforcement is a hook the core exposes").
fn check_access(
    defs: &DefinitionRegistry,
    store: &ObjectStore,
    req: &IncomingRequest,
    required: AclRight,
) -> Result<(), CoreError> {
    if req.is_bootstrap {
        return Ok(());
    }
    if req.path.object_instance_id == INVALID_ID {
        return Ok(());
    }
    match acl::resolve(defs, store, req.path.object_id, req.path.object_instance_id) {
        None => Ok(()),
        Some(entry) => {
            if entry.permits(req.short_server_id, required) {
                Ok(())
            } else {
                Err(CoreError::AccessDenied {
                    short_server_id: req.short_server_id,
                    path: req.path.to_string(),
                })
            }
        }
    }
}

/// Groups decoded `(path, value)` entries by the object-instance they
/// belong to and applies each group with [`ObjectStore::write_instance`],
/// per §4.2 rule 2 / §4.2a. Used for instance- and object-level PUT/POST
/// where whole-instance Replace/Update semantics apply; resource- and
/// resource-instance-level writes go straight through `store.set` instead
/// so a single-resource PUT never clears sibling resources (§4.2a: Replace
/// only clears at the *object-instance* granularity it was addressed at).
fn apply_grouped(
    store: &mut ObjectStore,
    defs: &DefinitionRegistry,
    mode: WriteMode,
    entries: Vec<(Path, Value)>,
) -> Result<Option<(u16, u16)>, CoreError> {
    use std::collections::BTreeMap;
    let mut by_instance: BTreeMap<(u16, u16), Vec<(u16, u16, Value)>> = BTreeMap::new();
    for (p, v) in entries {
        by_instance.entry((p.object_id, p.object_instance_id)).or_default().push((
            p.resource_id,
            p.resource_instance_id,
            v,
        ));
    }
    let mut first = None;
    for ((oid, iid), payload) in by_instance {
        store.write_instance(defs, oid, iid, mode, &payload)?;
        first.get_or_insert((oid, iid));
    }
    Ok(first)
}

fn handle_get(
    req: &IncomingRequest,
    defs: &DefinitionRegistry,
    store: &ObjectStore,
    observers: &mut ObservationEngine,
    default_format: ContentFormat,
    now_ms: u64,
) -> DispatchResponse {
    if req.accept == Some(ContentFormat::LinkFormat) {
        if !req.path.is_root() && !store.exists(req.path) {
            return err_response(CoreError::PathNotFound { path: req.path.to_string() });
        }
        let body = crate::codec::link_format::encode_subtree(defs, store, req.path);
        return DispatchResponse {
            code: ResponseCode::CONTENT,
            content_format: Some(ContentFormat::LinkFormat),
            payload: body.into_bytes(),
            ..Default::default()
        };
    }

    if let Err(e) = check_access(defs, store, req, AclRight::READ) {
        return err_response(e);
    }

    if req.observe == Some(ObserveOption::Cancel) {
        observers.cancel(req.short_server_id, req.path);
    }

    let format = req.accept.unwrap_or(default_format);
    match codec::encode(format, defs, store, req.path) {
        Ok(payload) => {
            let mut observe_registered = false;
            if req.observe == Some(ObserveOption::Register) {
                observers.register(req.short_server_id, req.path, req.token.clone(), format, now_ms, defs, store);
                observe_registered = true;
            }
            DispatchResponse {
                code: ResponseCode::CONTENT,
                content_format: Some(format),
                payload,
                observe_registered,
                ..Default::default()
            }
        }
        Err(e) => err_response(e),
    }
}

fn handle_put(
    req: &IncomingRequest,
    defs: &DefinitionRegistry,
    store: &mut ObjectStore,
    default_format: ContentFormat,
) -> DispatchResponse {
    if let Err(e) = check_access(defs, store, req, AclRight::WRITE) {
        return err_response(e);
    }
    let format = match req.content_format {
        Some(f) => f,
        None => default_format,
    };
    let entries = match codec::decode(format, &req.payload, req.path, defs) {
        Ok(e) => e,
        Err(e) => return err_response(e),
    };

    let result = if req.path.is_resource() || req.path.is_resource_instance() {
        entries.into_iter().try_for_each(|(p, v)| {
            let riid = if p.resource_instance_id == INVALID_ID { 0 } else { p.resource_instance_id };
            store.set(defs, p.object_id, p.object_instance_id, p.resource_id, riid, v)
        })
    } else {
        apply_grouped(store, defs, WriteMode::Replace, entries).map(|_| ())
    };

    match result {
        Ok(()) => DispatchResponse { code: ResponseCode::CHANGED, ..Default::default() },
        Err(e) => err_response(e),
    }
}

fn handle_post(
    req: &IncomingRequest,
    defs: &DefinitionRegistry,
    store: &mut ObjectStore,
    default_format: ContentFormat,
) -> DispatchResponse {
    if req.path.is_resource() {
        let res_def = match defs.lookup_resource(req.path.object_id, req.path.resource_id) {
            Some(d) => d,
            None => {
                return err_response(CoreError::NotDefined { path: req.path.to_string() });
            }
        };
        if res_def.value_kind.is_executable() {
            if let Err(e) = check_access(defs, store, req, AclRight::EXECUTE) {
                return err_response(e);
            }
            return match store.execute(defs, req.path.object_id, req.path.object_instance_id, req.path.resource_id, &req.payload)
            {
                Ok(()) => DispatchResponse { code: ResponseCode::CHANGED, ..Default::default() },
                Err(e) => err_response(e),
            };
        }
    }

    if let Err(e) = check_access(defs, store, req, AclRight::WRITE) {
        return err_response(e);
    }
    let format = req.content_format.unwrap_or(default_format);
    let entries = match codec::decode(format, &req.payload, req.path, defs) {
        Ok(e) => e,
        Err(e) => return err_response(e),
    };

    if req.path.is_object() {
        match apply_grouped(store, defs, WriteMode::Replace, entries) {
            Ok(Some((oid, iid))) => DispatchResponse {
                code: ResponseCode::CREATED,
                location_path: Some(format!("/{oid}/{iid}")),
                ..Default::default()
            },
            Ok(None) => err_response(CoreError::PayloadMalformed {
                reason: "empty Create payload".to_string(),
            }),
            Err(e) => err_response(e),
        }
    } else {
        match apply_grouped(store, defs, WriteMode::Update, entries) {
            Ok(_) => DispatchResponse { code: ResponseCode::CHANGED, ..Default::default() },
            Err(e) => err_response(e),
        }
    }
}

fn handle_delete(
    req: &IncomingRequest,
    defs: &DefinitionRegistry,
    store: &mut ObjectStore,
    observers: &mut ObservationEngine,
) -> DispatchResponse {
    if req.path.is_root() {
        if !req.is_bootstrap {
            return err_response(CoreError::MethodNotAllowed { path: req.path.to_string() });
        }
        return match store.delete(req.path, true) {
            Ok(()) => DispatchResponse { code: ResponseCode::DELETED, ..Default::default() },
            Err(e) => err_response(e),
        };
    }

    if !req.path.is_instance() {
        return err_response(CoreError::PathInvalid { path: req.path.to_string() });
    }
    if let Err(e) = check_access(defs, store, req, AclRight::DELETE) {
        return err_response(e);
    }
    match store.delete(req.path, false) {
        Ok(()) => {
            observers.cancel_all_for_server(req.short_server_id);
            DispatchResponse { code: ResponseCode::DELETED, ..Default::default() }
        }
        Err(e) => err_response(e),
    }
}

/// C5 entry point. Re-entrant only from the single event loop (§4.5).
pub fn dispatch(
    req: &IncomingRequest,
    defs: &DefinitionRegistry,
    store: &mut ObjectStore,
    observers: &mut ObservationEngine,
    default_format: ContentFormat,
    now_ms: u64,
) -> DispatchResponse {
    tracing::debug!(
        server = req.short_server_id,
        method = ?req.method,
        path = %req.path,
        "dispatch"
    );
    match req.method {
        CoapMethod::Get => handle_get(req, defs, store, observers, default_format, now_ms),
        CoapMethod::Put => handle_put(req, defs, store, default_format),
        CoapMethod::Post => handle_post(req, defs, store, default_format),
        CoapMethod::Delete => handle_delete(req, defs, store, observers),
    }
}

/// Write-Attributes (§4.3): not a Read/Write/Execute/Create/Delete
/// operation on the data model, so it is not routed through
/// [`dispatch`] — CoAP's Write-Attributes interaction reuses PUT's verb
/// but is distinguished by query parameters rather than payload, and only
/// ever targets the attribute store, never the object tree.
pub fn write_attributes(
    attributes: &mut AttributeStore,
    observers: &mut ObservationEngine,
    defs: &DefinitionRegistry,
    short_server_id: u16,
    path: Path,
    sets: &[(AttributeKey, f64)],
    cancel: Option<bool>,
) -> Result<(), CoreError> {
    let is_numeric = if path.is_resource() || path.is_resource_instance() {
        defs.lookup_resource(path.object_id, path.resource_id)
            .map(|r| matches!(r.value_kind, crate::value::ValueKind::Integer | crate::value::ValueKind::Float | crate::value::ValueKind::Time))
            .unwrap_or(false)
    } else {
        false
    };
    for (key, value) in sets {
        attributes.set(short_server_id, path, *key, *value, is_numeric)?;
    }
    if let Some(cancel) = cancel {
        attributes.set_cancel(short_server_id, path, cancel);
        if cancel {
            observers.cancel(short_server_id, path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Cardinality, ObjectDefinition, Operations, ResourceDefinition};
    use crate::value::ValueKind;

    fn defs() -> DefinitionRegistry {
        let mut reg = DefinitionRegistry::with_builtin_objects();
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
                    name: "Secret",
                    value_kind: ValueKind::Integer,
                    cardinality: Cardinality::Single,
                    mandatory: false,
                    operations: Operations { read: false, write: true, execute: false },
                    default: None,
                }),
        )
        .unwrap();
        reg
    }

    fn base_req(method: CoapMethod, path: Path) -> IncomingRequest {
        IncomingRequest {
            short_server_id: 123,
            method,
            path,
            content_format: Some(ContentFormat::PlainText),
            accept: Some(ContentFormat::PlainText),
            observe: None,
            payload: Vec::new(),
            token: vec![1],
            is_bootstrap: false,
        }
    }

    #[test]
    fn write_then_read_integer_roundtrip() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        let mut observers = ObservationEngine::new();

        let mut put = base_req(CoapMethod::Put, Path::resource(10000, 0, 0));
        put.payload = b"123456789".to_vec();
        let resp = dispatch(&put, &defs, &mut store, &mut observers, ContentFormat::PlainText, 0);
        assert_eq!(resp.code, ResponseCode::CHANGED);

        let get = base_req(CoapMethod::Get, Path::resource(10000, 0, 0));
        let resp = dispatch(&get, &defs, &mut store, &mut observers, ContentFormat::PlainText, 0);
        assert_eq!(resp.code, ResponseCode::CONTENT);
        assert_eq!(resp.payload, b"123456789");
    }

    #[test]
    fn type_mismatch_on_write_rejected_without_mutation() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        let mut observers = ObservationEngine::new();

        let mut put = base_req(CoapMethod::Put, Path::resource(10000, 0, 0));
        put.payload = b"not-a-number".to_vec();
        let resp = dispatch(&put, &defs, &mut store, &mut observers, ContentFormat::PlainText, 0);
        assert_eq!(resp.code, ResponseCode::BAD_REQUEST);
        assert!(!store.exists(Path::resource_instance(10000, 0, 0, 0)));
    }

    #[test]
    fn create_at_object_assigns_location() {
        let defs = defs();
        let mut store = ObjectStore::new();
        let mut observers = ObservationEngine::new();

        let mut post = base_req(CoapMethod::Post, Path::object(10000));
        post.content_format = Some(ContentFormat::Tlv);
        post.payload = crate::codec::tlv::encode(&defs, &{
            let mut s = ObjectStore::new();
            s.create_object_instance(&defs, 10000, Some(0)).unwrap();
            s.set(&defs, 10000, 0, 0, 0, Value::Integer(7)).unwrap();
            s
        }, Path::object(10000)).unwrap();

        let resp = dispatch(&post, &defs, &mut store, &mut observers, ContentFormat::Tlv, 0);
        assert_eq!(resp.code, ResponseCode::CREATED);
        assert_eq!(resp.location_path.as_deref(), Some("/10000/0"));
    }

    #[test]
    fn observe_on_write_only_resource_is_rejected_without_registering() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.set(&defs, 10000, 0, 1, 0, Value::Integer(1)).unwrap();
        let mut observers = ObservationEngine::new();

        let mut get = base_req(CoapMethod::Get, Path::resource(10000, 0, 1));
        get.observe = Some(ObserveOption::Register);
        let resp = dispatch(&get, &defs, &mut store, &mut observers, ContentFormat::PlainText, 0);
        assert_eq!(resp.code, ResponseCode::METHOD_NOT_ALLOWED);
        assert_eq!(observers.observer_count(), 0);
    }

    #[test]
    fn delete_instance_returns_deleted_and_cancels_observers() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        let mut observers = ObservationEngine::new();
        observers.register(123, Path::resource(10000, 0, 0), vec![9], ContentFormat::PlainText, 0, &defs, &store);

        let del = base_req(CoapMethod::Delete, Path::instance(10000, 0));
        let resp = dispatch(&del, &defs, &mut store, &mut observers, ContentFormat::PlainText, 0);
        assert_eq!(resp.code, ResponseCode::DELETED);
        assert_eq!(observers.observer_count(), 0);
    }

    #[test]
    fn unlisted_server_denied_by_acl() {
        let defs = defs();
        let mut store = ObjectStore::new();
        store.create_object_instance(&defs, 10000, Some(0)).unwrap();
        store.create_object_instance(&defs, acl::OBJECT_ID, Some(0)).unwrap();
        store.set_bootstrap(&defs, acl::OBJECT_ID, 0, acl::RES_OBJECT_ID, 0, Value::Integer(10000)).unwrap();
        store.set_bootstrap(&defs, acl::OBJECT_ID, 0, acl::RES_OBJECT_INSTANCE_ID, 0, Value::Integer(0)).unwrap();
        store.set(&defs, acl::OBJECT_ID, 0, acl::RES_ACL, 123, Value::Integer(AclRight::READ.bits() as i64)).unwrap();
        store.set(&defs, acl::OBJECT_ID, 0, acl::RES_OWNER, 0, Value::Integer(999)).unwrap();

        let mut observers = ObservationEngine::new();
        let mut put = base_req(CoapMethod::Put, Path::resource(10000, 0, 0));
        put.short_server_id = 456;
        put.payload = b"1".to_vec();
        let resp = dispatch(&put, &defs, &mut store, &mut observers, ContentFormat::PlainText, 0);
        assert_eq!(resp.code, ResponseCode::UNAUTHORIZED);
    }

    #[test]
    fn bootstrap_server_bypasses_acl_and_may_write_security_object() {
        let defs = defs();
        let mut store = ObjectStore::new();
        let iid = store.create_object_instance(&defs, crate::security::OBJECT_ID, Some(0)).unwrap();
        let mut observers = ObservationEngine::new();

        let mut put = base_req(CoapMethod::Put, Path::resource(crate::security::OBJECT_ID, iid, crate::security::RES_SERVER_URI));
        put.is_bootstrap = true;
        put.payload = b"coap://127.0.0.1:5683".to_vec();
        let resp = dispatch(&put, &defs, &mut store, &mut observers, ContentFormat::PlainText, 0);
        // Security resources declare Operations::NONE; even the bootstrap
        // bypass of ACL still goes through the ordinary dispatch path,
        // which respects the operation bitmask. Bootstrap writes use
        // `ObjectStore::set_bootstrap` directly (see `engines::bootstrap`),
        // not this dispatcher, to bypass that bitmask too.
        assert_eq!(resp.code, ResponseCode::METHOD_NOT_ALLOWED);
        let _ = iid;
    }
}
