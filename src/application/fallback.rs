//! Route fallback: rewrite unmatched routes toward the content controller.
//!
//! Two levels of process-wide memoization back the decision: a concurrent
//! map of controller-name resolvability, and the single discovered content
//! controller name. Both live on a long-lived [`RouteFallbackResolver`]
//! instance owned by the composition root and injected where requests are
//! handled; nothing here is ambient global state.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

/// Action a rewritten route dispatches to: serve the addressed content page.
pub const SERVE_PAGE_ACTION: &str = "page";

/// Outcome of asking the host framework whether a controller name resolves.
///
/// Lookup failures are a third, separate outcome (`Err`); they are collapsed
/// to "treat as absent" only where classification happens, never inside the
/// lookup itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerResolution {
    Resolved,
    Absent,
}

#[derive(Debug, Error)]
#[error("controller lookup failed: {message}")]
pub struct LookupError {
    message: String,
}

impl LookupError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Collaborator that probes the host framework's controller registration.
#[async_trait]
pub trait ControllerLookup: Send + Sync {
    async fn resolve_controller(&self, name: &str) -> Result<ControllerResolution, LookupError>;
}

/// A route registered with the host framework, as much of it as discovery
/// needs: the URL pattern and the controller the route declares as default.
#[derive(Debug, Clone)]
pub struct RegisteredRoute {
    pub pattern: String,
    pub default_controller: String,
}

/// Read access to the host framework's route table.
pub trait RouteRegistry: Send + Sync {
    fn routes(&self) -> Vec<RegisteredRoute>;
}

/// Process-wide memoization of controller-name resolvability.
///
/// Case-insensitive; populated lazily, never invalidated. Controller
/// registration is fixed at process start, so a cached answer stays correct
/// for the process lifetime. First-populate races are tolerated: the entry
/// API keeps whichever value landed first, and concurrent probes of the same
/// name compute the same answer anyway.
#[derive(Debug, Default)]
pub struct ControllerExistenceCache {
    entries: DashMap<String, bool>,
}

impl ControllerExistenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached resolvability for `name`, if the name has been seen.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<bool> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|entry| *entry)
    }

    /// Resolvability of `name`, probing `lookup` on first sight. A lookup
    /// error is collapsed to "absent" here, at the classification site, and
    /// cached as such.
    pub async fn classify(&self, name: &str, lookup: &dyn ControllerLookup) -> bool {
        let key = name.to_ascii_lowercase();
        if let Some(found) = self.entries.get(&key) {
            return *found;
        }

        counter!("teca_controller_probe_total").increment(1);
        let resolvable = match lookup.resolve_controller(name).await {
            Ok(ControllerResolution::Resolved) => true,
            Ok(ControllerResolution::Absent) => false,
            Err(err) => {
                warn!(
                    target = "application::fallback",
                    op = "classify",
                    result = "lookup_error",
                    controller = name,
                    error = %err,
                    "Controller lookup failed; treating name as absent"
                );
                false
            }
        };

        *self.entries.entry(key).or_insert(resolvable)
    }
}

/// Route values the fallback engine reads and rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteValues {
    pub controller: String,
    pub action: String,
}

/// Decision for one inbound route evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackDecision {
    /// The route already names a real controller (or no controller at all);
    /// dispatch proceeds unchanged.
    PassThrough,
    /// Dispatch with these values instead.
    Rewrite(RouteValues),
}

/// Rewrites routes whose controller does not resolve toward the content
/// controller discovered from the registered route table.
pub struct RouteFallbackResolver {
    cache: ControllerExistenceCache,
    lookup: Arc<dyn ControllerLookup>,
    registry: Arc<dyn RouteRegistry>,
    content_route: String,
    discovered: OnceLock<String>,
}

impl RouteFallbackResolver {
    pub fn new(
        lookup: Arc<dyn ControllerLookup>,
        registry: Arc<dyn RouteRegistry>,
        content_route: impl Into<String>,
    ) -> Self {
        Self {
            cache: ControllerExistenceCache::new(),
            lookup,
            registry,
            content_route: content_route.into(),
            discovered: OnceLock::new(),
        }
    }

    /// Evaluate one inbound route.
    pub async fn evaluate(&self, values: &RouteValues) -> FallbackDecision {
        if values.controller.is_empty() {
            return FallbackDecision::PassThrough;
        }
        if self
            .cache
            .classify(&values.controller, self.lookup.as_ref())
            .await
        {
            return FallbackDecision::PassThrough;
        }

        let Some(controller) = self.content_controller() else {
            warn!(
                target = "application::fallback",
                op = "evaluate",
                result = "no_content_route",
                content_route = %self.content_route,
                "No registered route matches the content route prefix; passing through"
            );
            return FallbackDecision::PassThrough;
        };

        debug!(
            target = "application::fallback",
            op = "evaluate",
            result = "rewrite",
            from_controller = %values.controller,
            to_controller = %controller,
            "Rewriting unmatched route to the content controller"
        );
        counter!("teca_fallback_rewrite_total").increment(1);
        FallbackDecision::Rewrite(RouteValues {
            controller,
            action: SERVE_PAGE_ACTION.to_string(),
        })
    }

    /// Resolvability cache, exposed for composition and inspection.
    #[must_use]
    pub fn existence_cache(&self) -> &ControllerExistenceCache {
        &self.cache
    }

    /// The content controller name, discovered once per process by scanning
    /// the route table for a pattern under the content route prefix. A
    /// failed scan caches nothing, so discovery retries on a later call.
    fn content_controller(&self) -> Option<String> {
        if let Some(name) = self.discovered.get() {
            return Some(name.clone());
        }

        let prefix = format!("{}/", self.content_route.trim_matches('/'));
        let found = self
            .registry
            .routes()
            .into_iter()
            .find(|route| starts_with_ignore_case(&route.pattern, &prefix))?;

        Some(
            self.discovered
                .get_or_init(|| found.default_controller)
                .clone(),
        )
    }
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
