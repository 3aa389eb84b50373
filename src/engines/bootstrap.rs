//! Bootstrap state machine (C6.1, §4.6.1), grounded on
//! `core/src/client/lwm2m_bootstrap.c` and the same
//! tick-evaluate-transition shape as [`crate::engines::registration`].

use crate::transport::{CoapMethod, CoapResponse, OutboundRequest, RequestId, Transport};

/// §4.6.1: `BootstrapPending` gives up after this long without a response.
pub const BOOTSTRAP_TIMEOUT_MS: u64 = 10_000;
/// §4.6.1: `BootstrapFinishPending` gives up after this long without the
/// server's finishing `/bs` POST.
pub const BOOTSTRAP_FINISH_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    NotBootstrapped,
    CheckExisting,
    ClientHoldOff { since_ms: u64 },
    BootstrapPending { request_id: RequestId, since_ms: u64 },
    BootstrapFinishPending { since_ms: u64 },
    Bootstrapped,
    BootstrapFailed { since_ms: u64 },
}

pub struct BootstrapConfig {
    pub bootstrap_server_uri: Option<String>,
    /// Factory-provisioned bootstrap information (§6: `factory_bootstrap_config`)
    /// that skips the bootstrap exchange entirely.
    pub has_factory_config: bool,
    pub client_hold_off_secs: u32,
}

/// C6.1: the bootstrap state machine. One per client (there is only ever
/// one bootstrap interface, unlike the per-server registration machine).
pub struct BootstrapEngine {
    pub state: BootstrapState,
    config: BootstrapConfig,
}

impl BootstrapEngine {
    pub fn new(config: BootstrapConfig) -> Self {
        BootstrapEngine { state: BootstrapState::NotBootstrapped, config }
    }

    /// Advances by a tick (§4.6.1). Returns `true` the tick this machine
    /// reaches `Bootstrapped`, signalling the caller to schedule `Register`
    /// on every loaded server.
    pub fn tick(&mut self, now_ms: u64, transport: &mut dyn Transport) -> bool {
        match self.state {
            BootstrapState::NotBootstrapped => {
                if self.config.has_factory_config {
                    tracing::info!("bootstrap: factory config present, bootstrapped");
                    self.state = BootstrapState::Bootstrapped;
                    return true;
                }
                // Always move to CheckExisting first, per the literal table
                // (SPEC_FULL.md §4.6.1): it is CheckExisting's own "all
                // existing servers fail to register" rule, vacuously true
                // with zero loaded servers, that decides whether to hold
                // off, not this arm.
                tracing::info!("bootstrap: checking existing servers");
                self.state = BootstrapState::CheckExisting;
                false
            }
            BootstrapState::CheckExisting => false,
            BootstrapState::ClientHoldOff { since_ms } => {
                if now_ms.saturating_sub(since_ms) < self.config.client_hold_off_secs as u64 * 1000 {
                    return false;
                }
                let Some(uri) = self.config.bootstrap_server_uri.clone() else {
                    tracing::warn!("bootstrap: hold-off elapsed but no bootstrap_server_uri configured");
                    return false;
                };
                if !transport.register_ready() {
                    return false;
                }
                let request_id = transport.send_request(
                    0,
                    OutboundRequest {
                        method: CoapMethod::Post,
                        uri: format!("{uri}/bs?ep=client"),
                        content_format: None,
                        payload: Vec::new(),
                    },
                );
                tracing::info!("bootstrap: requesting client-initiated bootstrap");
                self.state = BootstrapState::BootstrapPending { request_id, since_ms: now_ms };
                false
            }
            BootstrapState::BootstrapPending { since_ms, .. } => {
                if now_ms.saturating_sub(since_ms) >= BOOTSTRAP_TIMEOUT_MS {
                    tracing::warn!("bootstrap: client-initiated bootstrap timed out");
                    self.state = BootstrapState::BootstrapFailed { since_ms: now_ms };
                }
                false
            }
            BootstrapState::BootstrapFinishPending { since_ms } => {
                if now_ms.saturating_sub(since_ms) >= BOOTSTRAP_FINISH_TIMEOUT_MS {
                    tracing::warn!("bootstrap: finish-pending timed out without a /bs POST");
                    self.state = BootstrapState::BootstrapFailed { since_ms: now_ms };
                }
                false
            }
            BootstrapState::Bootstrapped => false,
            BootstrapState::BootstrapFailed { since_ms } => {
                if now_ms.saturating_sub(since_ms) >= self.config.client_hold_off_secs as u64 * 1000 {
                    tracing::info!("bootstrap: retrying from NotBootstrapped");
                    self.state = BootstrapState::NotBootstrapped;
                }
                false
            }
        }
    }

    pub fn on_response(&mut self, now_ms: u64, response: &CoapResponse) {
        if let BootstrapState::BootstrapPending { request_id, .. } = &self.state {
            if *request_id == response.request_id {
                if response.code == crate::transport::ResponseCode::CREATED {
                    tracing::info!("bootstrap: client-initiated bootstrap accepted, awaiting finish");
                    self.state = BootstrapState::BootstrapFinishPending { since_ms: now_ms };
                } else {
                    self.state = BootstrapState::BootstrapFailed { since_ms: now_ms };
                }
            }
        }
    }

    /// A server-originated `/bs` POST (§4.6.1): accepted unsolicited in
    /// `ClientHoldOff`/`BootstrapPending` to model server-initiated
    /// bootstrap, and as the expected finish signal in
    /// `BootstrapFinishPending`. Returns `true` when this POST completes
    /// the bootstrap.
    pub fn on_bootstrap_post(&mut self, now_ms: u64) -> bool {
        match self.state {
            BootstrapState::ClientHoldOff { .. } | BootstrapState::BootstrapPending { .. } => {
                tracing::info!("bootstrap: server-initiated bootstrap in progress");
                self.state = BootstrapState::BootstrapFinishPending { since_ms: now_ms };
                false
            }
            BootstrapState::BootstrapFinishPending { .. } => {
                tracing::info!("bootstrap: finished");
                self.state = BootstrapState::Bootstrapped;
                true
            }
            _ => false,
        }
    }

    /// §4.6.2a cascade: every known server has reached `RegisterFailed` (or
    /// there are no servers at all). Only meaningful from `CheckExisting`,
    /// which is also the only state the caller (`Core::tick`) invokes this
    /// from — the cascade condition stays true for as long as the servers
    /// stay failed, so if this were applied unconditionally on every tick
    /// regardless of state, it would reset an in-progress cascade
    /// (`ClientHoldOff`, `BootstrapPending`, `BootstrapFinishPending`) back
    /// to square one before it could ever reach `BootstrapPending`. Calling
    /// it only while still `CheckExisting` makes the transition
    /// edge-triggered: once it fires and moves past `CheckExisting`, later
    /// calls with the same still-failed servers are no-ops, and a later
    /// return to `CheckExisting` (after a `BootstrapFailed` retry) is free
    /// to fire the cascade again.
    pub fn on_all_registrations_failed(&mut self, now_ms: u64) {
        if self.state == BootstrapState::CheckExisting {
            tracing::info!("bootstrap: all servers failed registration, holding off");
            self.state = BootstrapState::ClientHoldOff { since_ms: now_ms };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn config(uri: Option<&str>, factory: bool) -> BootstrapConfig {
        BootstrapConfig {
            bootstrap_server_uri: uri.map(String::from),
            has_factory_config: factory,
            client_hold_off_secs: 5,
        }
    }

    #[test]
    fn factory_config_bootstraps_immediately() {
        let mut engine = BootstrapEngine::new(config(None, true));
        let mut transport = LoopbackTransport::new();
        let became = engine.tick(0, &mut transport);
        assert!(became);
        assert_eq!(engine.state, BootstrapState::Bootstrapped);
    }

    #[test]
    fn not_bootstrapped_always_moves_to_check_existing_first() {
        let mut engine = BootstrapEngine::new(config(Some("coap://bs.example"), false));
        let mut transport = LoopbackTransport::new();
        engine.tick(0, &mut transport);
        assert_eq!(engine.state, BootstrapState::CheckExisting);
    }

    #[test]
    fn hold_off_elapsed_sends_client_initiated_bootstrap() {
        let mut engine = BootstrapEngine::new(config(Some("coap://bs.example"), false));
        engine.state = BootstrapState::ClientHoldOff { since_ms: 0 };
        let mut transport = LoopbackTransport::new();

        engine.tick(5_000, &mut transport);

        assert!(matches!(engine.state, BootstrapState::BootstrapPending { .. }));
        assert_eq!(transport.sent_requests[0].2.uri, "coap://bs.example/bs?ep=client");
    }

    #[test]
    fn finish_pending_timeout_fails() {
        let mut engine = BootstrapEngine::new(config(Some("coap://bs.example"), false));
        engine.state = BootstrapState::BootstrapFinishPending { since_ms: 0 };
        let mut transport = LoopbackTransport::new();
        engine.tick(BOOTSTRAP_FINISH_TIMEOUT_MS, &mut transport);
        assert!(matches!(engine.state, BootstrapState::BootstrapFailed { .. }));
    }

    #[test]
    fn bootstrap_post_in_finish_pending_completes_bootstrap() {
        let mut engine = BootstrapEngine::new(config(Some("coap://bs.example"), false));
        engine.state = BootstrapState::BootstrapFinishPending { since_ms: 0 };
        assert!(engine.on_bootstrap_post(1_000));
        assert_eq!(engine.state, BootstrapState::Bootstrapped);
    }

    #[test]
    fn all_registrations_failed_from_check_existing_holds_off() {
        let mut engine = BootstrapEngine::new(config(Some("coap://bs.example"), false));
        engine.state = BootstrapState::CheckExisting;
        engine.on_all_registrations_failed(42);
        assert_eq!(engine.state, BootstrapState::ClientHoldOff { since_ms: 42 });
    }

    #[test]
    fn all_registrations_failed_does_not_reset_an_in_progress_cascade() {
        // A cascade already past CheckExisting must not be clobbered by a
        // repeated "all failed" signal on a later tick (the oscillation bug:
        // without this guard, ClientHoldOff/BootstrapPending/
        // BootstrapFinishPending would reset to NotBootstrapped every time
        // the still-failed condition was re-applied).
        for state in [
            BootstrapState::ClientHoldOff { since_ms: 0 },
            BootstrapState::BootstrapPending { request_id: 1, since_ms: 0 },
            BootstrapState::BootstrapFinishPending { since_ms: 0 },
        ] {
            let mut engine = BootstrapEngine::new(config(Some("coap://bs.example"), false));
            engine.state = state.clone();
            engine.on_all_registrations_failed(1_000);
            assert_eq!(engine.state, state, "state should be left untouched");
        }
    }
}
