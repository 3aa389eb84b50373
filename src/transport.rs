//! CoAP transport capability (§9, §9a): "for the transport, accept an
//! injected capability object." The concrete UDP/DTLS stack is out of scope
//! (§1) — this is only the seam the engines send requests through and the
//! dispatcher sends responses/notifications through.

use crate::codec::ContentFormat;
use rand::RngCore;

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoapMethod {
    Get,
    Put,
    Post,
    Delete,
}

/// A CoAP response code as `class.detail` (RFC 7252 §12.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResponseCode {
    pub class: u8,
    pub detail: u8,
}

impl ResponseCode {
    pub const CREATED: ResponseCode = ResponseCode { class: 2, detail: 1 };
    pub const DELETED: ResponseCode = ResponseCode { class: 2, detail: 2 };
    pub const CHANGED: ResponseCode = ResponseCode { class: 2, detail: 4 };
    pub const CONTENT: ResponseCode = ResponseCode { class: 2, detail: 5 };
    pub const BAD_REQUEST: ResponseCode = ResponseCode { class: 4, detail: 0 };
    pub const UNAUTHORIZED: ResponseCode = ResponseCode { class: 4, detail: 1 };
    pub const NOT_FOUND: ResponseCode = ResponseCode { class: 4, detail: 4 };
    pub const METHOD_NOT_ALLOWED: ResponseCode = ResponseCode { class: 4, detail: 5 };
    pub const NOT_ACCEPTABLE: ResponseCode = ResponseCode { class: 4, detail: 6 };
    pub const UNSUPPORTED_CONTENT_FORMAT: ResponseCode = ResponseCode { class: 4, detail: 15 };
    pub const INTERNAL_SERVER_ERROR: ResponseCode = ResponseCode { class: 5, detail: 0 };

    pub fn is_success(self) -> bool {
        self.class == 2
    }

    pub fn as_dotted(self) -> String {
        format!("{}.{:02}", self.class, self.detail)
    }
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: CoapMethod,
    pub uri: String,
    pub content_format: Option<ContentFormat>,
    pub payload: Vec<u8>,
}

/// A reply correlated back to the request that caused it via `request_id`.
#[derive(Debug, Clone)]
pub struct CoapResponse {
    pub request_id: RequestId,
    pub code: ResponseCode,
    pub location_path: Option<String>,
    pub payload: Vec<u8>,
}

/// Re-expresses Design Notes' "global-state singletons (the CoAP library
/// handle...) → pass an explicit core context... for the transport, accept
/// an injected capability object" (§9, §9a).
pub trait Transport {
    /// Enqueues an outbound request to `short_server_id` and returns
    /// immediately; the matching [`CoapResponse`] arrives later through
    /// whichever engine routes responses for that server (§4.6.4: "an
    /// engine never blocks").
    fn send_request(&mut self, short_server_id: u16, request: OutboundRequest) -> RequestId;

    /// Sends a response (ordinary GET/PUT/POST/DELETE reply, or a
    /// notification when `observe_seq` is `Some`) carrying the original
    /// request's token.
    fn send_response(
        &mut self,
        token: &[u8],
        observe_seq: Option<u32>,
        content_format: ContentFormat,
        payload: Vec<u8>,
    );

    /// Whether the underlying socket is currently able to accept sends.
    /// The loopback demo transport is always ready; a real UDP/DTLS
    /// transport would report `false` while still completing a handshake.
    fn register_ready(&self) -> bool {
        true
    }
}

/// In-memory loopback transport for the demo binary and tests: records
/// outgoing traffic instead of putting bytes on a socket.
#[derive(Default)]
pub struct LoopbackTransport {
    next_id: RequestId,
    pub sent_requests: Vec<(RequestId, u16, OutboundRequest)>,
    pub sent_responses: Vec<(Vec<u8>, Option<u32>, ContentFormat, Vec<u8>)>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport::default()
    }
}

impl Transport for LoopbackTransport {
    fn send_request(&mut self, short_server_id: u16, request: OutboundRequest) -> RequestId {
        self.next_id += 1;
        let id = self.next_id;
        tracing::debug!(short_server_id, method = ?request.method, uri = %request.uri, "enqueue outbound CoAP request");
        self.sent_requests.push((id, short_server_id, request));
        id
    }

    fn send_response(
        &mut self,
        token: &[u8],
        observe_seq: Option<u32>,
        content_format: ContentFormat,
        payload: Vec<u8>,
    ) {
        tracing::debug!(observe_seq = ?observe_seq, len = payload.len(), "enqueue CoAP response");
        self.sent_responses.push((token.to_vec(), observe_seq, content_format, payload));
    }
}

/// A fresh random CoAP token for a new Observe registration (§9a:
/// "`rand` is retained... for any place a random value is genuinely
/// needed (e.g. CoAP token generation)").
pub fn random_token() -> Vec<u8> {
    let mut token = vec![0u8; 8];
    rand::rng().fill_bytes(&mut token);
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_assigns_increasing_request_ids() {
        let mut transport = LoopbackTransport::new();
        let a = transport.send_request(
            123,
            OutboundRequest { method: CoapMethod::Post, uri: "/rd".into(), content_format: None, payload: vec![] },
        );
        let b = transport.send_request(
            123,
            OutboundRequest { method: CoapMethod::Put, uri: "/rd/1".into(), content_format: None, payload: vec![] },
        );
        assert!(b > a);
        assert_eq!(transport.sent_requests.len(), 2);
    }

    #[test]
    fn random_tokens_are_eight_bytes() {
        assert_eq!(random_token().len(), 8);
    }
}
