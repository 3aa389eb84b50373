//! Module wiring and the `Core` struct (§2): the six components (C1-C6)
//! assembled behind one cooperative, single-threaded entry point, the way
//! the host application's `lib.rs` declares its modules and `main.rs`
//! spawns its engines against one shared `AppState` — generalized here
//! into one `Core::tick` that advances bootstrap, then registration, then
//! notification, in that order (§5).

pub mod acl;
pub mod attributes;
pub mod codec;
pub mod config;
pub mod definition;
pub mod dispatch;
pub mod engines;
pub mod error;
pub mod path;
pub mod security;
pub mod server;
pub mod store;
pub mod transport;
pub mod value;

use attributes::AttributeStore;
use codec::ContentFormat;
use definition::DefinitionRegistry;
use dispatch::{DispatchResponse, IncomingRequest};
use engines::bootstrap::{BootstrapConfig, BootstrapEngine, BootstrapState};
use engines::observation::ObservationEngine;
use engines::registration::{self, RegistrationContext, RegistrationState};
use error::CoreError;
use server::ServerRecord;
use store::ObjectStore;
use transport::{CoapResponse, Transport};

/// Everything one running LwM2M client needs: the schema, the live tree,
/// the write-attributes, the observer set, and the three protocol engines
/// (§2). Owns the whole object store per §5 ("the object store is the
/// single mutable shared structure").
pub struct Core {
    pub defs: DefinitionRegistry,
    pub store: ObjectStore,
    pub attributes: AttributeStore,
    pub observers: ObservationEngine,
    pub bootstrap: BootstrapEngine,
    pub servers: Vec<ServerRecord>,
    endpoint_name: String,
    default_content_type: ContentFormat,
}

impl Core {
    /// Builds a `Core` with the built-in Security/Server/Access-Control
    /// definitions already registered (§3a) and an empty tree. Callers
    /// define any vendor objects (Device, etc. — out of scope per §1) and
    /// create instances before the first `tick`.
    pub fn new(config: &config::ClientConfig) -> Self {
        let bootstrap_config = BootstrapConfig {
            bootstrap_server_uri: config.bootstrap_server_uri.clone(),
            has_factory_config: config.factory_bootstrap_config.is_some(),
            client_hold_off_secs: config
                .factory_bootstrap_config
                .as_ref()
                .map(|_| 0)
                .unwrap_or(DEFAULT_CLIENT_HOLD_OFF_SECS),
        };
        Core {
            defs: DefinitionRegistry::with_builtin_objects(),
            store: ObjectStore::new(),
            attributes: AttributeStore::new(),
            observers: ObservationEngine::new(),
            bootstrap: BootstrapEngine::new(bootstrap_config),
            servers: Vec::new(),
            endpoint_name: config.endpoint_name.clone(),
            default_content_type: config.default_content_type.as_content_format(),
        }
    }

    /// Registers an additional object definition, enriching the schema
    /// built by [`Core::new`] (§4.1: "definitions must be registered
    /// before any instance of them is created").
    pub fn define_object(&mut self, def: definition::ObjectDefinition) -> Result<(), CoreError> {
        self.defs.define_object(def)?;
        Ok(())
    }

    /// Adds a server the client already knows about at start-up (factory
    /// bootstrap, §6) so the first `tick` finds it in `CheckExisting`
    /// rather than starting cold.
    pub fn add_server(&mut self, mut server: ServerRecord) {
        server.registration_state = RegistrationState::Register;
        self.servers.push(server);
    }

    /// Advances one tick of the event loop (§2, §5): bootstrap, then every
    /// server's registration, then observation/notification — in that
    /// fixed order so multiple timers expiring on the same tick still
    /// produce deterministic transitions.
    pub fn tick(&mut self, now_ms: u64, transport: &mut dyn Transport) {
        let became_bootstrapped = self.bootstrap.tick(now_ms, transport);
        if became_bootstrapped {
            for server in &mut self.servers {
                server.registration_state = RegistrationState::Register;
            }
        }

        let ctx = RegistrationContext { endpoint_name: &self.endpoint_name };
        for server in &mut self.servers {
            registration::tick(server, &ctx, now_ms, &self.defs, &self.store, transport);
        }

        // Edge-triggered: only feed the cascade while still CheckExisting.
        // The "all failed" condition stays true for as long as the servers
        // stay failed, so applying it unconditionally every tick would
        // reset an in-progress cascade (ClientHoldOff/BootstrapPending/
        // BootstrapFinishPending) back to square one before it ever reached
        // BootstrapPending. Once CheckExisting fires and moves past it,
        // later ticks with the same still-failed servers are no-ops here;
        // a later return to CheckExisting (after a BootstrapFailed retry)
        // is free to fire the cascade again.
        if self.bootstrap.state == BootstrapState::CheckExisting && registration::all_failed(&self.servers) {
            self.bootstrap.on_all_registrations_failed(now_ms);
        }

        let registered: Vec<u16> = self
            .servers
            .iter()
            .filter(|s| matches!(s.registration_state, RegistrationState::Registered { .. }))
            .map(|s| s.short_server_id)
            .collect();
        let storing: Vec<u16> =
            self.servers.iter().filter(|s| s.notification_storing).map(|s| s.short_server_id).collect();
        self.observers.tick(
            now_ms,
            &self.defs,
            &self.store,
            &self.attributes,
            |sid| registered.contains(&sid),
            |sid| storing.contains(&sid),
            transport,
        );
    }

    /// Dispatches one inbound CoAP request (§4.5) to the store/attribute
    /// store/observation engine.
    pub fn handle_request(&mut self, req: &IncomingRequest, now_ms: u64) -> DispatchResponse {
        dispatch::dispatch(req, &self.defs, &mut self.store, &mut self.observers, self.default_content_type, now_ms)
    }

    /// Routes a response to an earlier outbound request to whichever
    /// engine is waiting on it: the bootstrap machine for the `/bs`
    /// exchange, or the matching server's registration machine otherwise.
    pub fn handle_response(&mut self, short_server_id: u16, now_ms: u64, response: &CoapResponse) {
        if short_server_id == 0 {
            self.bootstrap.on_response(now_ms, response);
            return;
        }
        if let Some(server) = self.servers.iter_mut().find(|s| s.short_server_id == short_server_id) {
            registration::on_response(server, now_ms, response);
        }
    }

    /// A server-initiated `/bs` POST, unsolicited or finishing (§4.6.1).
    pub fn handle_bootstrap_post(&mut self, now_ms: u64) -> bool {
        let finished = self.bootstrap.on_bootstrap_post(now_ms);
        if finished {
            for server in &mut self.servers {
                server.registration_state = RegistrationState::Register;
            }
        }
        finished
    }

    /// Best-effort deregistration of every currently-registered server
    /// (§4.6.4: "on overall process shutdown the registration machine
    /// emits a best-effort DELETE for every Registered server").
    pub fn shutdown(&mut self, transport: &mut dyn Transport) {
        let ctx = RegistrationContext { endpoint_name: &self.endpoint_name };
        for server in &mut self.servers {
            if matches!(server.registration_state, RegistrationState::Registered { .. }) {
                server.registration_state = RegistrationState::Deregister;
                registration::tick(server, &ctx, 0, &self.defs, &self.store, transport);
            }
        }
    }
}

/// §4.6.1: the client hold-off used when no `ClientHoldOffTime` resource
/// has been written yet (e.g. before any Security object instance exists).
const DEFAULT_CLIENT_HOLD_OFF_SECS: u32 = 30;
