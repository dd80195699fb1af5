//! The one integration point between the untouched wire layer
//! (`http::request`/`http::response`/`server::*`) and the engine core
//! (`event`, `pool`, `cache`, `memory`, `middleware`, `router`).
//!
//! [`EngineHandler`] implements the crate's existing [`Handler`] trait —
//! the thing the connection loop already calls once per parsed request —
//! by populating an [`Event`] from the wire [`Request`], running it through
//! [`MiddlewareChain::execute`] and [`Router::find`], and writing
//! `Event.response` back into the wire [`Response`] builder via
//! [`Response::write_event`]. The TCP accept loop, the byte-level parser,
//! and the byte-level serializer stay untouched.
//!
//! Per the spec's concurrency model (§5), each `HttpConnection<H, S>` task
//! owns exactly one per-connection [`EngineConnectionState`] — its own
//! `MemoryManager` and `RouteCache` — constructed once per connection the
//! same way `Parser`/`Request`/`Response` already are. The route table and
//! the middleware chain are read-only after setup, so those are built once
//! and shared across connections behind an `Arc` instead of being rebuilt
//! per connection.

use crate::{
    errors::EngineError,
    event::Event,
    http::{
        request::Request,
        response::{Handled, Response},
        types::{Method, StatusCode},
    },
    limits::{CacheConfig, LogConfig, MemoryConfig},
    memory::MemoryManager,
    middleware::{
        cors_middleware, logger_middleware, rate_limit_middleware, request_id_middleware,
        security_middleware, timing_end_middleware, timing_middleware, MiddlewareChain,
        MiddlewareKind, MiddlewareOutcome,
    },
    router::{LinearRouteMatcher, RouteMatcher, Router},
    server::{connection::ConnectionData, server_impl::Handler},
};
use std::sync::{Arc, OnceLock};

/// A registered route handler: operates purely on the `Event`, writing its
/// response via `Event`'s `set_*`/`send_*` methods. `Arc`'d (not boxed)
/// because the router's matcher clones handler handles on every cache
/// miss — see `RouteMatcher`'s `H: Clone` bound.
pub type RouteHandler = Arc<dyn Fn(&mut Event) + Send + Sync>;

type SharedMatcher = Arc<dyn RouteMatcher<RouteHandler>>;

/// The process-wide route table + resource sizing, set exactly once by
/// [`EngineHandlerBuilder::build`] and read by every
/// [`EngineConnectionState::new`] thereafter — the same
/// fail-open-to-a-fixed-config-at-startup shape as
/// [`crate::memory::init_global_pool`]/[`crate::memory::global_pool`], except
/// this one is infallible: a missing config is a setup bug (no server built
/// yet), not a runtime condition a caller should handle.
struct EngineConfig {
    memory: MemoryConfig,
    cache_size: usize,
    matcher: SharedMatcher,
    log: LogConfig,
}

static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Per-connection engine state: the spec's "one arena pair, one pool, one
/// cache per worker" resources, where a connection — handled serially by a
/// single task, never concurrently with itself — is this framework's
/// worker boundary.
pub struct EngineConnectionState {
    memory: MemoryManager,
    router: Router<RouteHandler, SharedMatcher>,
    log: LogConfig,
}

impl EngineConnectionState {
    /// Builds connection state directly from its constituent parts, with no
    /// dependency on [`ENGINE_CONFIG`]. [`ConnectionData::new`] is the
    /// production path (reads the published global); tests that need more
    /// than one independent route table/matcher per process — which the
    /// global, first-wins-only `OnceLock` can't give them — call this
    /// directly via [`EngineHandlerBuilder::build_for_test`] instead.
    fn from_parts(memory: MemoryConfig, cache_size: usize, matcher: SharedMatcher, log: LogConfig) -> Self {
        Self {
            memory: MemoryManager::new(memory),
            router: Router::new(cache_size, matcher),
            log,
        }
    }
}

impl ConnectionData for EngineConnectionState {
    fn new() -> Self {
        let config = ENGINE_CONFIG
            .get()
            .expect("EngineHandlerBuilder::build must run before the server starts accepting connections");

        Self::from_parts(config.memory.clone(), config.cache_size, config.matcher.clone(), config.log.clone())
    }

    fn reset(&mut self) {
        self.memory.perform_gc();
        self.router.clear_cache();

        if self.log.enable_performance_logs {
            let pool = self.memory.stats();
            let cache = self.router.cache_stats();
            tracing::debug!(
                pool_hits = pool.pool_hits,
                pool_misses = pool.pool_misses,
                gc_runs = pool.gc_runs,
                cache_hits = cache.hits,
                cache_misses = cache.misses,
                cache_evictions = cache.evictions,
                "connection reset: memory/cache telemetry"
            );
        }
    }
}

/// C5+C6 bridge: the ordered middleware chain, shared read-only across
/// every connection (see the module doc — only the route *cache* and the
/// arenas/pool are per-connection).
pub struct EngineHandler {
    middleware: Arc<MiddlewareChain>,
}

impl EngineHandler {
    /// Runs one request's worth of engine logic against an already-
    /// populated `event`: middleware, then (on `Continue`) routing and the
    /// matched handler. Leaves `event.response` finished one way or
    /// another — a 404 for no match, a 500 if a handler returns without
    /// finishing its response, or whatever the matched handler itself set.
    ///
    /// Split out from `handle` so it can be exercised directly in tests
    /// without needing a real `Request`/`Response` pair.
    fn dispatch(&self, conn: &mut EngineConnectionState, event: &mut Event) -> Result<(), EngineError> {
        match self.middleware.execute(event) {
            MiddlewareOutcome::TerminateEarly => Ok(()),
            MiddlewareOutcome::Error(err) => Err(err),
            MiddlewareOutcome::Continue => {
                match conn.router.find(event.method(), event.path()) {
                    Some((handler, params)) => {
                        for (name, value) in params {
                            event.set_param(Vec::from(name), Vec::from(value));
                        }

                        handler(event);

                        if !event.is_finished() {
                            tracing::error!("route handler returned without finishing the response");
                            event.set_status(StatusCode::InternalServerError);
                            let _ = event.send_text("Internal Server Error");
                        }
                    }
                    None => {
                        event.set_status(StatusCode::NotFound);
                        let _ = event.send_text("Not Found");
                    }
                }
                Ok(())
            }
        }
    }
}

impl Handler<EngineConnectionState> for EngineHandler {
    async fn handle(
        &self,
        connection_data: &mut EngineConnectionState,
        request: &Request,
        response: &mut Response,
    ) -> Handled {
        let mut event = connection_data.memory.acquire_event();
        event.populate_from_request(request);

        let handled = match self.dispatch(connection_data, &mut event) {
            Ok(()) => response.write_event(&mut event),
            Err(err) => {
                tracing::error!(error = %err, "engine error, closing connection");
                response.write_engine_error(err)
            }
        };

        connection_data.memory.release_event(event);
        connection_data.memory.reset_request_arena();

        handled
    }
}

/// Builds an [`EngineHandler`]: registers route patterns and middlewares,
/// then [`build`](Self::build)s once at startup — the same fluent,
/// consuming-`self` shape as [`crate::ServerBuilder`].
pub struct EngineHandlerBuilder {
    middleware: MiddlewareChain,
    matcher: LinearRouteMatcher<RouteHandler>,
    memory: MemoryConfig,
    cache: CacheConfig,
    log: LogConfig,
}

impl EngineHandlerBuilder {
    pub fn new() -> Self {
        Self {
            middleware: MiddlewareChain::new(),
            matcher: LinearRouteMatcher::new(),
            memory: MemoryConfig::default(),
            cache: CacheConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn memory_config(mut self, config: MemoryConfig) -> Self {
        self.memory = config;
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Sets the build-time logging config consulted by `.logger()`'s
    /// middleware and the fast path's inlined request line
    /// (`enable_request_logs`) and by per-connection reset telemetry
    /// (`enable_performance_logs`). `enable_connection_logs`/`log_level`
    /// are reserved for the surrounding TCP acceptor, which this engine
    /// does not own (see spec §1's external-collaborator scope).
    pub fn log_config(mut self, config: LogConfig) -> Self {
        self.log = config;
        self
    }

    /// Registers `pattern` (e.g. `/users/:id`) for `method`, bound to
    /// `handler`. See [`LinearRouteMatcher::register`].
    pub fn route(
        mut self,
        method: Method,
        pattern: &str,
        handler: impl Fn(&mut Event) + Send + Sync + 'static,
    ) -> Self {
        self.matcher.register(method, pattern, Arc::new(handler) as RouteHandler);
        self
    }

    /// # Panics
    /// If more than 16 middlewares (built-in or custom) are registered —
    /// a setup-time mistake, per the spec's `TooManyMiddlewares`.
    pub fn logger(mut self) -> Self {
        self.middleware
            .register(MiddlewareKind::Logger, logger_middleware(self.log.clone()))
            .expect("too many middlewares registered");
        self
    }

    /// See [`EngineHandlerBuilder::logger`]'s panic note.
    pub fn cors(mut self) -> Self {
        self.middleware
            .register(MiddlewareKind::Cors, cors_middleware())
            .expect("too many middlewares registered");
        self
    }

    /// See [`EngineHandlerBuilder::logger`]'s panic note.
    pub fn security(mut self) -> Self {
        self.middleware
            .register(MiddlewareKind::Security, security_middleware())
            .expect("too many middlewares registered");
        self
    }

    /// See [`EngineHandlerBuilder::logger`]'s panic note.
    pub fn timing(mut self) -> Self {
        self.middleware
            .register(MiddlewareKind::Timing, timing_middleware())
            .expect("too many middlewares registered");
        self.middleware
            .register(MiddlewareKind::TimingEnd, timing_end_middleware())
            .expect("too many middlewares registered");
        self
    }

    /// See [`EngineHandlerBuilder::logger`]'s panic note.
    pub fn request_id(mut self) -> Self {
        self.middleware
            .register(MiddlewareKind::RequestId, request_id_middleware())
            .expect("too many middlewares registered");
        self
    }

    /// Registers the `rate_limit` placeholder (see `DESIGN.md`: always a
    /// no-op). See [`EngineHandlerBuilder::logger`]'s panic note.
    pub fn rate_limit(mut self) -> Self {
        self.middleware
            .register(MiddlewareKind::RateLimit, rate_limit_middleware())
            .expect("too many middlewares registered");
        self
    }

    /// Registers a custom middleware. See
    /// [`EngineHandlerBuilder::logger`]'s panic note.
    pub fn middleware(mut self, middleware: impl Fn(&mut Event) -> MiddlewareOutcome + Send + Sync + 'static) -> Self {
        self.middleware
            .register(MiddlewareKind::Custom, middleware)
            .expect("too many middlewares registered");
        self
    }

    /// Finalizes the route table and middleware chain, handing back the
    /// `EngineHandler` plus the now-owned `SharedMatcher`/config pieces a
    /// caller needs to publish (production) or use directly (tests).
    fn finalize(self) -> (EngineHandler, SharedMatcher) {
        let matcher: SharedMatcher = Arc::new(self.matcher);
        let mut middleware = self.middleware;
        middleware.set_log_config(self.log.clone());

        let handler = EngineHandler {
            middleware: Arc::new(middleware),
        };

        (handler, matcher)
    }

    /// Finalizes the route table and middleware chain and publishes the
    /// per-connection sizing into [`ENGINE_CONFIG`] — the first `build()`
    /// call in a process wins; later ones are no-ops, mirroring
    /// [`crate::memory::init_global_pool`].
    pub fn build(self) -> EngineHandler {
        let memory = self.memory.clone();
        let cache_size = self.cache.max_size;
        let log = self.log.clone();
        let (handler, matcher) = self.finalize();

        let _ = ENGINE_CONFIG.set(EngineConfig {
            memory,
            cache_size,
            matcher,
            log,
        });

        handler
    }

    /// Test-only counterpart to [`EngineHandlerBuilder::build`] that never
    /// touches [`ENGINE_CONFIG`]. Each call returns a fully independent
    /// `EngineHandler` + `EngineConnectionState` pair built from this
    /// builder's own route table and sizing, so tests that each register
    /// different routes don't race over the process-wide, first-wins-only
    /// global — something `build()` alone cannot give them, since
    /// `ConnectionData::new()` takes no arguments and must read from
    /// somewhere shared.
    #[cfg(test)]
    pub(crate) fn build_for_test(self) -> (EngineHandler, EngineConnectionState) {
        let memory = self.memory.clone();
        let cache_size = self.cache.max_size;
        let log = self.log.clone();
        let (handler, matcher) = self.finalize();

        let conn = EngineConnectionState::from_parts(memory, cache_size, matcher, log);
        (handler, conn)
    }
}

impl Default for EngineHandlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ReqLimits;

    fn handler_with_routes() -> (EngineHandler, EngineConnectionState) {
        EngineHandlerBuilder::new()
            .route(Method::Get, "/health", |event| {
                event.send_text("ok").unwrap();
            })
            .route(Method::Get, "/users/:id", |event| {
                let id = event.get_param(b"id").unwrap().to_vec();
                event.send_text(id).unwrap();
            })
            .build_for_test()
    }

    fn event_for(method: Method, path: &str) -> Event {
        let mut event = Event::new();
        event.method = method;
        event.path = crate::event::StrVal::owned(path.as_bytes().to_vec());
        event
    }

    #[test]
    fn dispatch_routes_to_matched_handler() {
        let (handler, mut conn) = handler_with_routes();
        let mut event = event_for(Method::Get, "/health");

        handler.dispatch(&mut conn, &mut event).unwrap();

        assert!(event.is_finished());
        assert_eq!(event.status(), StatusCode::Ok);
    }

    #[test]
    fn dispatch_captures_route_params() {
        let (handler, mut conn) = handler_with_routes();
        let mut event = event_for(Method::Get, "/users/42");

        handler.dispatch(&mut conn, &mut event).unwrap();

        assert!(event.is_finished());
    }

    #[test]
    fn dispatch_unmatched_route_is_404() {
        let (handler, mut conn) = handler_with_routes();
        let mut event = event_for(Method::Get, "/missing");

        handler.dispatch(&mut conn, &mut event).unwrap();

        assert_eq!(event.status(), StatusCode::NotFound);
    }

    #[test]
    fn dispatch_handler_that_forgets_to_finish_is_500() {
        let (handler, mut conn) = EngineHandlerBuilder::new()
            .route(Method::Get, "/broken", |_event| {
                // deliberately doesn't call any send_*
            })
            .build_for_test();
        let mut event = event_for(Method::Get, "/broken");

        handler.dispatch(&mut conn, &mut event).unwrap();

        assert!(event.is_finished());
        assert_eq!(event.status(), StatusCode::InternalServerError);
    }

    // S4, at the integration level: an OPTIONS request never reaches a
    // registered handler once logger+cors is wired in.
    #[test]
    fn dispatch_cors_preflight_short_circuits_before_routing() {
        let (handler, mut conn) = EngineHandlerBuilder::new()
            .logger()
            .cors()
            .route(Method::Options, "/health", |_event| {
                panic!("handler must not run for an OPTIONS preflight");
            })
            .build_for_test();
        let mut event = event_for(Method::Options, "/health");

        handler.dispatch(&mut conn, &mut event).unwrap();

        assert_eq!(event.status(), StatusCode::NoContent);
    }

    #[test]
    fn dispatch_propagates_middleware_error() {
        let (handler, mut conn) = EngineHandlerBuilder::new()
            .middleware(|_event| MiddlewareOutcome::Error(EngineError::MiddlewareError("boom".into())))
            .build_for_test();
        let mut event = event_for(Method::Get, "/anything");

        let err = handler.dispatch(&mut conn, &mut event).unwrap_err();
        assert_eq!(err, EngineError::MiddlewareError("boom".into()));
    }

    #[test]
    fn repeated_requests_on_one_connection_reuse_the_event_pool() {
        let (handler, mut conn) = handler_with_routes();

        for _ in 0..5 {
            let mut event = conn.memory.acquire_event();
            event.method = Method::Get;
            event.path = crate::event::StrVal::owned(b"/health".to_vec());
            handler.dispatch(&mut conn, &mut event).unwrap();
            conn.memory.release_event(event);
        }

        let stats = conn.memory.stats();
        assert_eq!(stats.pool_misses, 1);
        assert_eq!(stats.pool_hits, 4);
    }

    #[test]
    fn route_cache_hits_on_repeated_path() {
        let (handler, mut conn) = handler_with_routes();

        let mut first = event_for(Method::Get, "/health");
        handler.dispatch(&mut conn, &mut first).unwrap();

        let mut second = event_for(Method::Get, "/health");
        handler.dispatch(&mut conn, &mut second).unwrap();

        assert_eq!(conn.router.cache_stats().hits, 1);
        assert_eq!(conn.router.cache_stats().misses, 1);
    }

    #[tokio::test]
    async fn handle_writes_response_through_the_wire_builder() {
        let (handler, mut conn) = handler_with_routes();
        let request = Request::new(&ReqLimits::default());
        let mut response = Response::new(&crate::limits::RespLimits::default());

        handler.handle(&mut conn, &request, &mut response).await;

        // The default, unparsed `Request` is GET "/" - no route matches,
        // so the wire response should carry the engine's 404.
        assert!(response.buffer().windows(3).any(|w| w == b"404"));
    }
}
