//! Observation and notification engine (C6.3, §4.6.3, §4.6.3a). Re-expresses
//! `alert_engine.rs`'s threshold-crossing-triggers-transition idiom as
//! per-observer pmin/pmax/gt/lt/st evaluation instead of alert-rule
//! conditions.

use crate::attributes::{AttributeSet, AttributeStore};
use crate::codec::{self, ContentFormat};
use crate::definition::DefinitionRegistry;
use crate::path::Path;
use crate::store::ObjectStore;
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};

/// §4.6.3a: fixed per-server bound, newest-wins eviction on overflow.
pub const MAX_STORED_NOTIFICATIONS_PER_SERVER: usize = 64;

struct Observer {
    token: Vec<u8>,
    content_format: ContentFormat,
    last_sent_time_ms: u64,
    /// The last encoded payload sent, used as a cheap stand-in for "last
    /// sent value hash or sample" (§3) that works at any path granularity,
    /// not just a single numeric resource.
    last_sent_payload: Option<Vec<u8>>,
    /// The last numeric reading, when the observed path is a single
    /// numeric resource-instance; `None` otherwise (gt/lt/st then never
    /// apply and any payload change suffices).
    last_numeric: Option<f64>,
    observe_seq: u32,
}

struct StoredNotification {
    token: Vec<u8>,
    path: Path,
    content_format: ContentFormat,
    observe_seq: u32,
}

/// C6.3: every currently-registered observer plus, per disconnected server
/// with storing enabled, a bounded queue of notifications awaiting flush.
#[derive(Default)]
pub struct ObservationEngine {
    observers: HashMap<(u16, Path), Observer>,
    storing_queues: HashMap<u16, VecDeque<StoredNotification>>,
}

impl ObservationEngine {
    pub fn new() -> Self {
        ObservationEngine::default()
    }

    pub fn register(
        &mut self,
        server: u16,
        path: Path,
        token: Vec<u8>,
        content_format: ContentFormat,
        now_ms: u64,
        defs: &DefinitionRegistry,
        store: &ObjectStore,
    ) {
        self.observers.insert(
            (server, path),
            Observer {
                token,
                content_format,
                last_sent_time_ms: now_ms,
                last_sent_payload: encode_current(defs, store, content_format, path),
                last_numeric: numeric_current(defs, store, path),
                observe_seq: 0,
            },
        );
    }

    pub fn cancel(&mut self, server: u16, path: Path) {
        self.observers.remove(&(server, path));
    }

    /// A deregistration removes all observers for that server (§4.6.3).
    pub fn cancel_all_for_server(&mut self, server: u16) {
        self.observers.retain(|(s, _), _| *s != server);
        self.storing_queues.remove(&server);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Evaluates every observer and flushes any server's stored-notification
    /// queue once it has become reachable again (§4.6.3, §4.6.3a).
    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        now_ms: u64,
        defs: &DefinitionRegistry,
        store: &ObjectStore,
        attributes: &AttributeStore,
        server_registered: impl Fn(u16) -> bool,
        server_notification_storing: impl Fn(u16) -> bool,
        transport: &mut dyn Transport,
    ) {
        let keys: Vec<(u16, Path)> = self.observers.keys().copied().collect();
        for key in keys {
            self.evaluate_one(key, now_ms, defs, store, attributes, &server_registered, &server_notification_storing, transport);
        }

        let servers: Vec<u16> = self.storing_queues.keys().copied().collect();
        for server in servers {
            if !server_registered(server) {
                continue;
            }
            let Some(queue) = self.storing_queues.get_mut(&server) else { continue };
            while let Some(stored) = queue.pop_front() {
                if let Ok(payload) = codec::encode(stored.content_format, defs, store, stored.path) {
                    transport.send_response(&stored.token, Some(stored.observe_seq), stored.content_format, payload);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_one(
        &mut self,
        key: (u16, Path),
        now_ms: u64,
        defs: &DefinitionRegistry,
        store: &ObjectStore,
        attributes: &AttributeStore,
        server_registered: &impl Fn(u16) -> bool,
        server_notification_storing: &impl Fn(u16) -> bool,
        transport: &mut dyn Transport,
    ) {
        if !store.exists(key.1) {
            self.observers.remove(&key);
            return;
        }

        let attrs = attributes.resolve(key.0, key.1);
        let Some(observer) = self.observers.get(&key) else { return };
        let elapsed_ms = now_ms.saturating_sub(observer.last_sent_time_ms);
        if elapsed_ms < attrs.pmin_secs as u64 * 1000 {
            return;
        }

        let content_format = observer.content_format;
        let current_payload = encode_current(defs, store, content_format, key.1);
        let current_numeric = numeric_current(defs, store, key.1);
        let changed = current_payload != observer.last_sent_payload;
        let pmax_due = attrs.pmax_secs.is_some_and(|pmax| elapsed_ms >= pmax as u64 * 1000);
        let value_condition = changed && numeric_condition_met(&attrs, observer.last_numeric, current_numeric);

        if !pmax_due && !value_condition {
            return;
        }

        let Some(observer) = self.observers.get_mut(&key) else { return };
        let token = observer.token.clone();
        observer.observe_seq = observer.observe_seq.wrapping_add(1);
        let seq = observer.observe_seq;
        observer.last_sent_time_ms = now_ms;
        observer.last_sent_payload = current_payload;
        observer.last_numeric = current_numeric;

        if server_registered(key.0) {
            match codec::encode(content_format, defs, store, key.1) {
                Ok(payload) => {
                    tracing::debug!(server = key.0, path = %key.1, seq, "notify");
                    transport.send_response(&token, Some(seq), content_format, payload);
                }
                Err(e) => tracing::warn!(server = key.0, path = %key.1, "notification encode failed: {e}"),
            }
        } else if server_notification_storing(key.0) {
            let queue = self.storing_queues.entry(key.0).or_default();
            if queue.len() >= MAX_STORED_NOTIFICATIONS_PER_SERVER {
                queue.pop_front();
            }
            queue.push_back(StoredNotification { token, path: key.1, content_format, observe_seq: seq });
        }
    }
}

fn encode_current(defs: &DefinitionRegistry, store: &ObjectStore, format: ContentFormat, path: Path) -> Option<Vec<u8>> {
    codec::encode(format, defs, store, path).ok()
}

fn numeric_current(defs: &DefinitionRegistry, store: &ObjectStore, path: Path) -> Option<f64> {
    if !path.is_resource() && !path.is_resource_instance() {
        return None;
    }
    let riid = if path.is_resource() { 0 } else { path.resource_instance_id };
    store.get(defs, path.object_id, path.object_instance_id, path.resource_id, riid).ok().and_then(|v| v.as_f64())
}

/// §4.6.3 rule 2's numeric sub-clause. Non-numeric paths (or a path with no
/// numeric attribute set) fall through to "any change suffices".
fn numeric_condition_met(attrs: &AttributeSet, previous: Option<f64>, current: Option<f64>) -> bool {
    let (Some(prev), Some(curr)) = (previous, current) else { return true };
    let has_numeric_attr = attrs.gt.is_some() || attrs.lt.is_some() || attrs.st.is_some();
    if !has_numeric_attr {
        return true;
    }
    let gt_crossed = attrs.gt.is_some_and(|gt| (prev < gt) != (curr < gt));
    let lt_crossed = attrs.lt.is_some_and(|lt| (prev < lt) != (curr < lt));
    let st_exceeded = attrs.st.is_some_and(|st| (curr - prev).abs() >= st);
    gt_crossed || lt_crossed || st_exceeded
}
