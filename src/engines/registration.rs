//! Per-server registration state machine (C6.2, §4.6.2, §4.6.2a), grounded
//! on `core/src/client/lwm2m_registration.c` and re-expressing
//! `alert_engine.rs`'s tick-evaluate-transition shape: one state per
//! `ServerRecord`, advanced by `tick`, absorbing failures as state
//! transitions rather than propagating them (§4.6.4).

use crate::codec::{link_format, ContentFormat};
use crate::definition::DefinitionRegistry;
use crate::server::ServerRecord;
use crate::store::ObjectStore;
use crate::transport::{CoapMethod, CoapResponse, OutboundRequest, RequestId, Transport};

/// §4.6.2: both Registering and UpdatingRegistration give up after this
/// long without a response.
pub const REGISTRATION_TIMEOUT_MS: u64 = 30_000;
/// §4.6.2a: confirmed against the original registration loop as a literal
/// `10`, counted on `ServerRecord::registration_attempts` across the whole
/// Register/Registering/RegisterFailedRetry cycle and reset only on a
/// successful registration or update.
pub const REGISTRATION_RETRY_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    NotRegistered,
    Register,
    Registering { request_id: RequestId, since_ms: u64 },
    Registered { since_ms: u64 },
    UpdatingRegistration { request_id: RequestId, since_ms: u64 },
    Deregister,
    Deregistering { request_id: RequestId },
    RegisterFailedRetry { since_ms: u64 },
    RegisterFailed,
}

/// Endpoint-level parameters shared by every server, kept off
/// `ServerRecord` itself since they belong to the client, not the server.
pub struct RegistrationContext<'a> {
    pub endpoint_name: &'a str,
}

/// Advances one server's state machine by a tick (§4.6.2). The caller
/// advances bootstrap before calling this, and all servers within the same
/// tick, per §5's ordering guarantee.
pub fn tick(
    server: &mut ServerRecord,
    ctx: &RegistrationContext,
    now_ms: u64,
    defs: &DefinitionRegistry,
    store: &ObjectStore,
    transport: &mut dyn Transport,
) {
    match &server.registration_state {
        RegistrationState::Register => {
            if !transport.register_ready() {
                return;
            }
            let body = link_format::encode_registration(defs, store);
            let uri = format!(
                "{}/rd?ep={}&lt={}&b={}",
                server.registration_uri, ctx.endpoint_name, server.lifetime_secs, server.binding
            );
            let request_id = transport.send_request(
                server.short_server_id,
                OutboundRequest {
                    method: CoapMethod::Post,
                    uri,
                    content_format: Some(ContentFormat::LinkFormat),
                    payload: body.into_bytes(),
                },
            );
            tracing::info!(short_server_id = server.short_server_id, "registering");
            server.registration_state = RegistrationState::Registering { request_id, since_ms: now_ms };
        }
        RegistrationState::Registering { since_ms, .. } => {
            if now_ms.saturating_sub(*since_ms) >= REGISTRATION_TIMEOUT_MS {
                fail_retry(server, now_ms);
            }
        }
        RegistrationState::Registered { since_ms } => {
            let due = now_ms.saturating_sub(*since_ms) >= (server.lifetime_secs as u64 * 1000) / 2;
            if due || server.update_requested {
                server.update_requested = false;
                let location = server.registration_location.clone().unwrap_or_default();
                let uri = format!("{location}?lt={}&b={}", server.lifetime_secs, server.binding);
                let request_id = transport.send_request(
                    server.short_server_id,
                    OutboundRequest { method: CoapMethod::Put, uri, content_format: None, payload: Vec::new() },
                );
                tracing::info!(short_server_id = server.short_server_id, "updating registration");
                server.registration_state = RegistrationState::UpdatingRegistration { request_id, since_ms: now_ms };
            }
        }
        RegistrationState::UpdatingRegistration { since_ms, .. } => {
            if now_ms.saturating_sub(*since_ms) >= REGISTRATION_TIMEOUT_MS {
                fail_retry(server, now_ms);
            }
        }
        RegistrationState::Deregister => {
            let location = server.registration_location.clone().unwrap_or_default();
            let request_id = transport.send_request(
                server.short_server_id,
                OutboundRequest { method: CoapMethod::Delete, uri: location, content_format: None, payload: Vec::new() },
            );
            server.registration_state = RegistrationState::Deregistering { request_id };
        }
        RegistrationState::Deregistering { .. } => {}
        RegistrationState::RegisterFailedRetry { since_ms } => {
            if now_ms.saturating_sub(*since_ms) >= server.lifetime_secs as u64 * 1000 {
                if server.registration_attempts >= REGISTRATION_RETRY_ATTEMPTS {
                    tracing::warn!(short_server_id = server.short_server_id, "registration permanently failed");
                    server.registration_state = RegistrationState::RegisterFailed;
                } else {
                    server.registration_state = RegistrationState::Register;
                }
            }
        }
        RegistrationState::NotRegistered | RegistrationState::RegisterFailed => {}
    }
}

fn fail_retry(server: &mut ServerRecord, now_ms: u64) {
    server.registration_attempts += 1;
    tracing::warn!(
        short_server_id = server.short_server_id,
        attempts = server.registration_attempts,
        "registration attempt failed"
    );
    server.registration_state = RegistrationState::RegisterFailedRetry { since_ms: now_ms };
}

/// Feeds a response into the state machine. The caller is responsible for
/// routing a `CoapResponse` to the right `server` (e.g. by short-server-id);
/// a response whose `request_id` doesn't match the current in-flight
/// request is ignored.
pub fn on_response(server: &mut ServerRecord, now_ms: u64, response: &CoapResponse) {
    match &server.registration_state {
        RegistrationState::Registering { request_id, .. } if *request_id == response.request_id => {
            if response.code.is_success() {
                let Some(location) = response.location_path.clone() else {
                    fail_retry(server, now_ms);
                    return;
                };
                server.registration_location = Some(location);
                server.registration_attempts = 0;
                tracing::info!(short_server_id = server.short_server_id, "registered");
                server.registration_state = RegistrationState::Registered { since_ms: now_ms };
            } else {
                fail_retry(server, now_ms);
            }
        }
        RegistrationState::UpdatingRegistration { request_id, .. } if *request_id == response.request_id => {
            if response.code.is_success() {
                server.registration_attempts = 0;
                server.registration_state = RegistrationState::Registered { since_ms: now_ms };
            } else {
                fail_retry(server, now_ms);
            }
        }
        RegistrationState::Deregistering { request_id } if *request_id == response.request_id => {
            server.registration_state = RegistrationState::NotRegistered;
        }
        _ => {}
    }
}

/// §4.6.2a: "a server count of zero is treated as 'all failed'". Drives the
/// bootstrap cascade.
pub fn all_failed(servers: &[ServerRecord]) -> bool {
    servers.is_empty() || servers.iter().all(|s| s.registration_state == RegistrationState::RegisterFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn ctx() -> RegistrationContext<'static> {
        RegistrationContext { endpoint_name: "TestClient1" }
    }

    #[test]
    fn register_sends_rd_post_and_moves_to_registering() {
        let defs = DefinitionRegistry::with_builtin_objects();
        let store = ObjectStore::new();
        let mut transport = LoopbackTransport::new();
        let mut server = ServerRecord::new(0, 123, "coap://127.0.0.1:5683".into(), 60);
        server.registration_state = RegistrationState::Register;

        tick(&mut server, &ctx(), 0, &defs, &store, &mut transport);

        assert!(matches!(server.registration_state, RegistrationState::Registering { .. }));
        assert_eq!(transport.sent_requests.len(), 1);
        assert_eq!(transport.sent_requests[0].2.uri, "coap://127.0.0.1:5683/rd?ep=TestClient1&lt=60&b=U");
    }

    #[test]
    fn successful_created_response_moves_to_registered_with_location() {
        let defs = DefinitionRegistry::with_builtin_objects();
        let store = ObjectStore::new();
        let mut transport = LoopbackTransport::new();
        let mut server = ServerRecord::new(0, 123, "coap://127.0.0.1:5683".into(), 60);
        server.registration_state = RegistrationState::Register;
        tick(&mut server, &ctx(), 0, &defs, &store, &mut transport);
        let request_id = transport.sent_requests[0].0;

        on_response(
            &mut server,
            0,
            &crate::transport::CoapResponse {
                request_id,
                code: crate::transport::ResponseCode::CREATED,
                location_path: Some("/rd/abc".into()),
                payload: Vec::new(),
            },
        );

        assert!(matches!(server.registration_state, RegistrationState::Registered { .. }));
        assert_eq!(server.registration_location.as_deref(), Some("/rd/abc"));
    }

    #[test]
    fn ten_failed_retries_reach_register_failed() {
        let mut server = ServerRecord::new(0, 123, "coap://unreachable".into(), 1);
        server.registration_attempts = REGISTRATION_RETRY_ATTEMPTS;
        server.registration_state = RegistrationState::RegisterFailedRetry { since_ms: 0 };

        let defs = DefinitionRegistry::with_builtin_objects();
        let store = ObjectStore::new();
        let mut transport = LoopbackTransport::new();
        tick(&mut server, &ctx(), 1_000, &defs, &store, &mut transport);

        assert_eq!(server.registration_state, RegistrationState::RegisterFailed);
    }

    #[test]
    fn fewer_than_ten_failed_retries_tries_again() {
        let mut server = ServerRecord::new(0, 123, "coap://unreachable".into(), 1);
        server.registration_attempts = REGISTRATION_RETRY_ATTEMPTS - 1;
        server.registration_state = RegistrationState::RegisterFailedRetry { since_ms: 0 };

        let defs = DefinitionRegistry::with_builtin_objects();
        let store = ObjectStore::new();
        let mut transport = LoopbackTransport::new();
        tick(&mut server, &ctx(), 1_000, &defs, &store, &mut transport);

        assert_eq!(server.registration_state, RegistrationState::Register);
    }

    #[test]
    fn zero_servers_counts_as_all_failed() {
        assert!(all_failed(&[]));
    }

    #[test]
    fn registering_timeout_enters_retry() {
        let defs = DefinitionRegistry::with_builtin_objects();
        let store = ObjectStore::new();
        let mut transport = LoopbackTransport::new();
        let mut server = ServerRecord::new(0, 123, "coap://127.0.0.1:5683".into(), 60);
        server.registration_state = RegistrationState::Registering { request_id: 1, since_ms: 0 };

        tick(&mut server, &ctx(), REGISTRATION_TIMEOUT_MS, &defs, &store, &mut transport);

        assert!(matches!(server.registration_state, RegistrationState::RegisterFailedRetry { .. }));
        assert_eq!(server.registration_attempts, 1);
    }
}
