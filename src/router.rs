//! C6 — the collaborator-facing router: given `(method, path)`, returns a
//! handler and captured parameters, consulting [`RouteCache`] first.
//!
//! The spec only fixes the interface here (`find`); the match strategy
//! behind a cache miss is this crate's own choice. A linear scan over
//! registered patterns is used — allocation-free, and more than adequate
//! for the route-table sizes this engine targets (the cache exists
//! precisely so steady-state traffic never re-runs it).

use crate::{
    cache::{CacheStats, RouteCache},
    http::types::Method,
};
use std::sync::Arc;

/// Something that can turn `(method, path)` into a handler and captured
/// route parameters on a cache miss.
///
/// `H` is the router's handler handle — typically a small `Copy` id
/// indexing into the embedding application's own handler table.
pub trait RouteMatcher<H>: Send + Sync {
    fn match_route(&self, method: Method, path: &[u8]) -> Option<(H, Vec<(Box<[u8]>, Box<[u8]>)>)>;
}

/// C6: wraps a [`RouteMatcher`] with a [`RouteCache`] in front of it.
///
/// Unmatched requests are cached too, under a reserved `None` handler slot
/// (`CacheEntry<Option<H>>`), so a storm of 404s for non-existent paths
/// doesn't bypass the cache and re-run the matcher every time — the spec's
/// "distinguished not-found handler tag" in §4.6.
pub struct Router<H, M> {
    cache: RouteCache<Option<H>>,
    matcher: M,
}

impl<H: Clone, M: RouteMatcher<H>> Router<H, M> {
    pub fn new(max_cache_size: usize, matcher: M) -> Self {
        Self {
            cache: RouteCache::new(max_cache_size),
            matcher,
        }
    }

    /// `find(method, path) -> (handler, params)` or not-found, per the
    /// spec's interface-level contract. Consults the cache first; on miss,
    /// runs the matcher and populates the cache with the result (hit or
    /// not-found) before returning.
    pub fn find(
        &mut self,
        method: Method,
        path: &[u8],
    ) -> Option<(H, Vec<(Box<[u8]>, Box<[u8]>)>)> {
        if let Some(entry) = self.cache.get(method, path) {
            return entry.handler.clone().map(|h| (h, entry.params.clone()));
        }

        match self.matcher.match_route(method, path) {
            Some((handler, params)) => {
                self.cache.put(method, path, Some(handler.clone()), params.clone());
                Some((handler, params))
            }
            None => {
                self.cache.put(method, path, None, Vec::new());
                None
            }
        }
    }

    #[inline]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[inline]
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

/// Lets a `dyn RouteMatcher<H>` trait object, shared across connections via
/// `Arc`, stand in for an owned `M: RouteMatcher<H>` — see `engine.rs`: the
/// route table itself is built once and shared read-only; only each
/// connection's `RouteCache` is private, mutable state.
impl<H> RouteMatcher<H> for Arc<dyn RouteMatcher<H>> {
    fn match_route(&self, method: Method, path: &[u8]) -> Option<(H, Vec<(Box<[u8]>, Box<[u8]>)>)> {
        (**self).match_route(method, path)
    }
}

/// A route pattern segment: either a literal to match exactly, or a
/// `:name` capture that matches any single path segment.
#[derive(Debug, Clone)]
enum Segment {
    Literal(Vec<u8>),
    Capture(Vec<u8>),
}

/// A minimal allocation-free-on-match linear route table: one registered
/// pattern per route, tried in registration order.
///
/// This is not part of the spec's core (the Non-goals exclude "any
/// user-facing API beyond what the handler sees") — it exists only so
/// [`Router`] has a real, testable [`RouteMatcher`] behind it rather than
/// an inert trait with no implementation in the crate.
#[derive(Default)]
pub struct LinearRouteMatcher<H> {
    routes: Vec<(Method, Vec<Segment>, H)>,
}

impl<H: Clone> LinearRouteMatcher<H> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `pattern` (e.g. `/users/:id/posts`) for `method`, bound to
    /// `handler`. Segments starting with `:` capture that path segment
    /// under the name following the colon.
    pub fn register(&mut self, method: Method, pattern: &str, handler: H) {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Capture(name.as_bytes().to_vec()),
                None => Segment::Literal(s.as_bytes().to_vec()),
            })
            .collect();

        self.routes.push((method, segments, handler));
    }
}

impl<H: Clone + Send + Sync> RouteMatcher<H> for LinearRouteMatcher<H> {
    fn match_route(&self, method: Method, path: &[u8]) -> Option<(H, Vec<(Box<[u8]>, Box<[u8]>)>)> {
        let path_segments: Vec<&[u8]> = path
            .split(|&b| b == b'/')
            .filter(|s| !s.is_empty())
            .collect();

        for (route_method, pattern, handler) in &self.routes {
            if *route_method != method || pattern.len() != path_segments.len() {
                continue;
            }

            let mut params = Vec::new();
            let matched = pattern.iter().zip(path_segments.iter()).all(|(seg, actual)| {
                match seg {
                    Segment::Literal(lit) => lit.as_slice() == *actual,
                    Segment::Capture(name) => {
                        params.push((name.clone().into_boxed_slice(), actual.to_vec().into_boxed_slice()));
                        true
                    }
                }
            });

            if matched {
                return Some((handler.clone(), params));
            }
        }

        None
    }
}
