//! C5 — the middleware chain: up to 16 registered middlewares, dispatched
//! either through a hand-inlined fast path (logger + CORS [+ security],
//! nothing else registered) or a general sequential loop.
//!
//! The fast path exists because the general loop's `dyn Fn` indirection is
//! measurable overhead on the hottest three-middleware configuration this
//! engine expects in practice; everything else pays the indirection.

use crate::{
    errors::EngineError,
    event::Event,
    http::types::{Method, StatusCode},
    limits::LogConfig,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// What running a single middleware (or the whole chain) decided.
///
/// Re-exported at the crate root (`maker_web::MiddlewareOutcome`) — custom
/// middlewares registered through [`crate::engine::EngineHandlerBuilder`]
/// return this.
#[derive(Debug)]
pub enum MiddlewareOutcome {
    /// Proceed to the next middleware (or, after the last one, to routing).
    Continue,
    /// Stop the chain now; the response already set on the Event is final
    /// (e.g. a CORS preflight's 204).
    TerminateEarly,
    /// Stop the chain and surface `EngineError` to the connection handler.
    Error(EngineError),
}

/// Identifies *what* a registered middleware is, independent of the
/// closure's identity — `MiddlewareChain` cannot compare `dyn Fn` pointers
/// for equality, so it tags each registration explicitly instead and uses
/// the tags to decide whether the fast path applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MiddlewareKind {
    Logger,
    Cors,
    Security,
    Timing,
    TimingEnd,
    RequestId,
    /// Always a no-op (see `DESIGN.md`'s open-question decision); kept as
    /// its own tag so a chain can still declare intent to rate-limit
    /// without the engine pretending to enforce it.
    RateLimit,
    Custom,
}

type MiddlewareFn = Box<dyn Fn(&mut Event) -> MiddlewareOutcome + Send + Sync>;

const MAX_MIDDLEWARES: usize = 16;

/// C5: an ordered, capacity-16 list of middlewares run before routing.
pub(crate) struct MiddlewareChain {
    entries: Vec<(MiddlewareKind, MiddlewareFn)>,
    has_logger: bool,
    has_cors: bool,
    has_security: bool,
    log: LogConfig,
}

impl MiddlewareChain {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            has_logger: false,
            has_cors: false,
            has_security: false,
            log: LogConfig::default(),
        }
    }

    /// Sets the build-time logging config consulted by the fast path's
    /// inlined logger line (`enable_request_logs`). Registered standalone
    /// middlewares (`logger_middleware`) carry their own copy captured at
    /// construction instead, since they run through the general `dyn Fn`
    /// path and can't reach back into the chain that holds them.
    pub(crate) fn set_log_config(&mut self, log: LogConfig) {
        self.log = log;
    }

    /// Registers `middleware` under `kind`. Errors with `TooManyMiddlewares`
    /// past the 16-entry cap — a setup-time mistake, not a request-time one.
    pub(crate) fn register(
        &mut self,
        kind: MiddlewareKind,
        middleware: impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        if self.entries.len() >= MAX_MIDDLEWARES {
            return Err(EngineError::TooManyMiddlewares);
        }

        match kind {
            MiddlewareKind::Logger => self.has_logger = true,
            MiddlewareKind::Cors => self.has_cors = true,
            MiddlewareKind::Security => self.has_security = true,
            _ => {}
        }

        self.entries.push((kind, Box::new(middleware)));
        Ok(())
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Runs the chain against `event`. Takes the inlined fast path when the
    /// chain is at most `logger + cors [+ security]` and nothing else;
    /// otherwise walks `entries` in registration order.
    pub(crate) fn execute(&self, event: &mut Event) -> MiddlewareOutcome {
        if self.entries.len() <= 3 && self.has_logger && self.has_cors {
            self.execute_fast_path(event)
        } else {
            self.execute_slow_path(event)
        }
    }

    fn execute_fast_path(&self, event: &mut Event) -> MiddlewareOutcome {
        if self.log.enable_request_logs {
            tracing::info!(
                method = ?event.method(),
                path = %String::from_utf8_lossy(event.path()),
                "request"
            );
        }

        event.set_response_header("access-control-allow-origin", "*");
        event.set_response_header(
            "access-control-allow-methods",
            "GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS",
        );
        event.set_response_header("access-control-allow-headers", "content-type, authorization");

        // S4: an OPTIONS preflight never reaches routing — the fast path
        // answers it directly with an empty 204.
        if event.method() == Method::Options {
            event.set_status(StatusCode::NoContent);
            let _ = event.send_bytes(Vec::new());
            return MiddlewareOutcome::TerminateEarly;
        }

        if self.has_security {
            event.set_response_header("x-content-type-options", "nosniff");
            event.set_response_header("x-frame-options", "DENY");
            event.set_response_header("x-xss-protection", "1; mode=block");
        }

        MiddlewareOutcome::Continue
    }

    fn execute_slow_path(&self, event: &mut Event) -> MiddlewareOutcome {
        for (_, middleware) in &self.entries {
            match middleware(event) {
                MiddlewareOutcome::Continue => continue,
                terminal => return terminal,
            }
        }

        MiddlewareOutcome::Continue
    }
}

/// Logs `method`/`path` at `info` and continues, gated by
/// `log.enable_request_logs`. Equivalent, when chosen by hand in a
/// logger+cors[+security] chain, to the fast path's inlined version of the
/// same line (which reads the chain's own `LogConfig` instead of one
/// captured at registration time).
pub(crate) fn logger_middleware(log: LogConfig) -> impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync {
    move |event: &mut Event| {
        if log.enable_request_logs {
            tracing::info!(
                method = ?event.method(),
                path = %String::from_utf8_lossy(event.path()),
                "request"
            );
        }
        MiddlewareOutcome::Continue
    }
}

/// Sets permissive CORS headers and short-circuits `OPTIONS` requests with
/// an empty `204`, per the spec's preflight handling (`S4`).
pub(crate) fn cors_middleware() -> impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync {
    |event: &mut Event| {
        event.set_response_header("access-control-allow-origin", "*");
        event.set_response_header(
            "access-control-allow-methods",
            "GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS",
        );
        event.set_response_header("access-control-allow-headers", "content-type, authorization");

        if event.method() == Method::Options {
            event.set_status(StatusCode::NoContent);
            let _ = event.send_bytes(Vec::new());
            return MiddlewareOutcome::TerminateEarly;
        }

        MiddlewareOutcome::Continue
    }
}

/// Sets a conservative set of defensive response headers.
pub(crate) fn security_middleware() -> impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync {
    |event: &mut Event| {
        event.set_response_header("x-content-type-options", "nosniff");
        event.set_response_header("x-frame-options", "DENY");
        event.set_response_header("x-xss-protection", "1; mode=block");
        MiddlewareOutcome::Continue
    }
}

/// Stamps the request's start time into `context` for `timing_end_middleware`
/// to read back later in the chain.
pub(crate) fn timing_middleware() -> impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync {
    |event: &mut Event| {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        event.set_context("__request_start_ns", now.as_nanos().to_string());
        MiddlewareOutcome::Continue
    }
}

/// Reads the timestamp `timing_middleware` stamped and sets
/// `x-response-time-ms`. A no-op if `timing_middleware` never ran.
pub(crate) fn timing_end_middleware() -> impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync {
    |event: &mut Event| {
        if let Some(start_ns) = event
            .get_context(b"__request_start_ns")
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .and_then(|s| s.parse::<u128>().ok())
        {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            let elapsed_ms = now.saturating_sub(start_ns) / 1_000_000;
            event.set_response_header("x-response-time-ms", elapsed_ms.to_string());
        }
        MiddlewareOutcome::Continue
    }
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stamps a per-process-unique request id into `context` and
/// `x-request-id`. Monotonic counter, not a UUID — this engine has no
/// dependency on randomness anywhere else and doesn't need one here either.
pub(crate) fn request_id_middleware() -> impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync {
    |event: &mut Event| {
        let id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let id = format!("req-{id:x}");
        event.set_context("request_id", id.clone());
        event.set_response_header("x-request-id", id);
        MiddlewareOutcome::Continue
    }
}

/// Placeholder for real rate limiting — always continues. See
/// `DESIGN.md`'s open-question decision: this engine's scope ends at
/// per-connection concerns, and a real limiter needs cross-connection
/// shared state this single-threaded-per-worker design doesn't have yet.
pub(crate) fn rate_limit_middleware() -> impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync {
    |_event: &mut Event| MiddlewareOutcome::Continue
}
