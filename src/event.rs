//! C1 — the mutable per-request/response value object passed down the
//! middleware chain to the final route handler.
//!
//! See [`crate::pool`] for the free-list that recycles these, and
//! [`crate::middleware`]/[`crate::router`] for what mutates them on the way
//! to a handler.

use crate::http::{request::Request, types::{Method, StatusCode, Version}};

/// A byte string tagged with its owner.
///
/// Every string-valued field on [`Event`] carries one of these instead of a
/// plain `&'static [u8]` plus a length/allowlist heuristic to decide whether
/// it needs freeing. `Owned` bytes are freed (dropped) when the field is
/// overwritten or the Event is reset; `Static` bytes never are, because they
/// point at program text, not at anything the Event allocated.
#[derive(Debug, Clone)]
pub(crate) enum StrVal {
    Owned(Box<[u8]>),
    Static(&'static [u8]),
}

impl StrVal {
    #[inline(always)]
    pub(crate) fn owned(bytes: impl Into<Vec<u8>>) -> Self {
        StrVal::Owned(bytes.into().into_boxed_slice())
    }

    #[inline(always)]
    pub(crate) const fn from_static(bytes: &'static [u8]) -> Self {
        StrVal::Static(bytes)
    }

    #[inline(always)]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            StrVal::Owned(b) => b,
            StrVal::Static(b) => b,
        }
    }
}

impl Default for StrVal {
    #[inline(always)]
    fn default() -> Self {
        StrVal::Static(b"")
    }
}

impl PartialEq for StrVal {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&[u8]> for StrVal {
    #[inline]
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

/// An ordered list of owned-or-static key/value pairs.
///
/// Backs `Event::headers`, `Event::params`, `Event::context`, and
/// `Event::response.headers`. Linear scan, same as
/// [`crate::http::types::HeaderMap`] — these maps hold a handful of entries
/// per request, so a `Vec` beats a hash map on both allocation count and
/// cache behavior.
///
/// # Critical contract
/// [`StrMap::set`] MUST free the old value (and the old key, if it was
/// owned) before installing the new pair. Skipping this is the exact
/// progressive-slowdown leak the source's post-mortem describes — see
/// `P3` and the `S1` regression test in `pool.rs`.
#[derive(Debug, Clone, Default)]
pub(crate) struct StrMap {
    entries: Vec<(StrVal, StrVal)>,
}

impl StrMap {
    #[inline(always)]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frees every entry and clears the map, retaining its `Vec` capacity.
    #[inline]
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub(crate) fn get(&self, key: &[u8], case_insensitive: bool) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| key_matches(k.as_bytes(), key, case_insensitive))
            .map(|(_, v)| v.as_bytes())
    }

    /// Inserts or overwrites `key`. If `key` already exists, the old key and
    /// value are dropped in place before the new pair replaces them — the
    /// contract `P3` depends on.
    #[inline]
    pub(crate) fn set(&mut self, key: StrVal, value: StrVal, case_insensitive: bool) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| key_matches(k.as_bytes(), key.as_bytes(), case_insensitive))
        {
            Some(slot) => *slot = (key, value),
            None => self.entries.push((key, value)),
        }
    }

    #[inline]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_bytes(), v.as_bytes()))
    }
}

#[inline(always)]
fn key_matches(stored: &[u8], lookup: &[u8], case_insensitive: bool) -> bool {
    if case_insensitive {
        stored.eq_ignore_ascii_case(lookup)
    } else {
        stored == lookup
    }
}

/// The response half of an [`Event`]: what the handler writes, and what the
/// serializer reads back out once `finished` is set.
#[derive(Debug, Clone)]
pub(crate) struct EventResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: StrMap,
    pub(crate) body: Option<StrVal>,
    /// `true` iff `body` was allocated by a `send_*` call (as opposed to,
    /// hypothetically, a zero-copy static body) — governs whether
    /// `reset_event` must free it.
    pub(crate) body_owned: bool,
    /// Set by `send_*` itself (see the module doc for why: it must be
    /// reachable from a single handler, not only after the wire serializer
    /// has run).
    pub(crate) sent: bool,
    pub(crate) finished: bool,
}

impl EventResponse {
    #[inline(always)]
    fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: StrMap::with_capacity(8),
            body: None,
            body_owned: false,
            sent: false,
            finished: false,
        }
    }

    #[inline]
    fn reset(&mut self) {
        self.status = StatusCode::Ok;
        self.headers.clear();
        self.body = None;
        self.body_owned = false;
        self.sent = false;
        self.finished = false;
    }
}

/// Programming-error / setup-time failures surfaced by [`Event`] operations.
///
/// `AlreadySent` is the only variant an `Event` method itself returns; the
/// rest of `EngineError` (see `errors.rs`) is surfaced by the pool, cache,
/// and middleware chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("response already sent for this event")]
    AlreadySent,
}

/// C1: the mutable per-request container threaded through
/// `MiddlewareChain::execute` down to the matched route handler.
///
/// Holds the request as parsed by the wire layer (`method`/`path`/`query`/
/// `version`/`headers`/`body`), the route match (`params`), middleware/
/// handler scratch space (`context`), and the response under construction.
#[derive(Debug, Clone)]
pub struct Event {
    pub(crate) method: Method,
    pub(crate) path: StrVal,
    pub(crate) query: StrVal,
    pub(crate) version: Version,
    pub(crate) body: Option<StrVal>,
    pub(crate) headers: StrMap,
    pub(crate) params: StrMap,
    pub(crate) context: StrMap,
    pub(crate) response: EventResponse,
}

impl Event {
    /// Builds a freshly-initialized Event. Only called by
    /// [`crate::pool::EventPool`] on a genuine miss (`created_count`);
    /// every other Event handed to a request comes from `reset_event`.
    pub(crate) fn new() -> Self {
        Self {
            method: Method::Get,
            path: StrVal::default(),
            query: StrVal::default(),
            version: Version::Http11,
            body: None,
            headers: StrMap::with_capacity(16),
            params: StrMap::with_capacity(4),
            context: StrMap::with_capacity(4),
            response: EventResponse::new(),
        }
    }

    /// The `reset_event` algorithm from the spec's EventPool design (§4.2).
    ///
    /// Frees every Event-owned string, clears every mapping while retaining
    /// its `Vec` capacity (deliberately — see `DESIGN.md`'s open-question
    /// decision on capacity retention), and resets scalars to their
    /// defaults. After this returns, `self` is observationally identical to
    /// [`Event::new`], up to map capacity — `P2`.
    pub(crate) fn reset_event(&mut self) {
        self.method = Method::Get;
        self.path = StrVal::default();
        self.query = StrVal::default();
        self.version = Version::Http11;
        self.body = None;

        self.headers.clear();
        self.params.clear();
        self.context.clear();

        self.response.reset();
    }

    /// Fills `self` (freshly acquired or reset) with the wire-parsed
    /// `request` — the engine's bridge from `HttpConnection`'s zero-copy
    /// `Request` into the middleware/router-facing `Event`. Only the
    /// request-side fields are touched; `self.response` is left at
    /// whatever `acquire`/`reset_event` already put it in.
    pub(crate) fn populate_from_request(&mut self, request: &Request) {
        self.method = request.method();
        self.path = StrVal::from_static(request.url().path_static());
        self.query = match request.url().query_full_static() {
            Some(query) => StrVal::from_static(query),
            None => StrVal::default(),
        };
        self.version = request.version();
        self.body = request.body_static().map(StrVal::from_static);

        for (name, value) in request.headers_iter() {
            self.headers
                .set(StrVal::from_static(name), StrVal::from_static(value), true);
        }
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn path(&self) -> &[u8] {
        self.path.as_bytes()
    }

    #[inline]
    pub fn query(&self) -> &[u8] {
        self.query.as_bytes()
    }

    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_ref().map(StrVal::as_bytes)
    }

    #[inline]
    pub fn get_header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name, true)
    }

    #[inline]
    pub fn set_header(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.headers
            .set(StrVal::owned(name), StrVal::owned(value), true);
    }

    #[inline]
    pub fn get_param(&self, name: &[u8]) -> Option<&[u8]> {
        self.params.get(name, false)
    }

    #[inline]
    pub fn set_param(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.params
            .set(StrVal::owned(name), StrVal::owned(value), false);
    }

    #[inline]
    pub fn get_context(&self, name: &[u8]) -> Option<&[u8]> {
        self.context.get(name, false)
    }

    #[inline]
    pub fn set_context(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.context
            .set(StrVal::owned(name), StrVal::owned(value), false);
    }

    #[inline]
    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    #[inline]
    pub fn set_response_header(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.response
            .headers
            .set(StrVal::owned(name), StrVal::owned(value), true);
    }

    #[inline]
    pub fn get_response_header(&self, name: &[u8]) -> Option<&[u8]> {
        self.response.headers.get(name, true)
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.response.finished
    }

    /// Iterates the finished response's headers in insertion order. Read by
    /// the engine's wire bridge (`Response::write_event`) once `finished`;
    /// not meant for handler code, which already has
    /// [`Event::get_response_header`].
    #[inline]
    pub(crate) fn response_headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.response.headers.iter()
    }

    /// Takes ownership of the response body a `send_*` call set, leaving
    /// `None` behind. Only the wire bridge calls this, immediately before
    /// the `Event` is released back to the pool.
    #[inline]
    pub(crate) fn take_response_body_bytes(&mut self) -> Option<Box<[u8]>> {
        self.response.body.take().map(|v| match v {
            StrVal::Owned(b) => b,
            StrVal::Static(b) => b.to_vec().into_boxed_slice(),
        })
    }

    fn send(&mut self, body: StrVal, content_type: Option<&'static [u8]>) -> Result<(), EventError> {
        if self.response.sent {
            return Err(EventError::AlreadySent);
        }

        if let Some(content_type) = content_type {
            self.response
                .headers
                .set(StrVal::from_static(b"content-type"), StrVal::from_static(content_type), true);
        }

        self.response.body = Some(body);
        self.response.body_owned = true;
        self.response.sent = true;
        self.response.finished = true;
        Ok(())
    }

    /// Sends `text` with `content-type: text/plain`.
    #[inline]
    pub fn send_text(&mut self, text: impl Into<Vec<u8>>) -> Result<(), EventError> {
        self.send(StrVal::owned(text), Some(b"text/plain; charset=utf-8"))
    }

    /// Sends `json` verbatim with `content-type: application/json`.
    ///
    /// Takes pre-serialized bytes; the engine does not depend on a JSON
    /// crate itself — callers serialize with whatever they already use.
    #[inline]
    pub fn send_json(&mut self, json: impl Into<Vec<u8>>) -> Result<(), EventError> {
        self.send(StrVal::owned(json), Some(b"application/json"))
    }

    /// Sends `html` with `content-type: text/html`.
    #[inline]
    pub fn send_html(&mut self, html: impl Into<Vec<u8>>) -> Result<(), EventError> {
        self.send(StrVal::owned(html), Some(b"text/html; charset=utf-8"))
    }

    /// Sends raw `bytes` without setting `content-type` (caller must set
    /// one via [`Event::set_response_header`] beforehand if needed).
    #[inline]
    pub fn send_bytes(&mut self, bytes: impl Into<Vec<u8>>) -> Result<(), EventError> {
        self.send(StrVal::owned(bytes), None)
    }
}
