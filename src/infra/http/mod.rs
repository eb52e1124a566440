mod content;
mod middleware;

pub use content::{HttpState, build_router};

use std::collections::BTreeSet;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sqlx::Error as SqlxError;

use crate::application::error::{AppError, HttpError};
use crate::application::fallback::{
    ControllerLookup, ControllerResolution, LookupError, RegisteredRoute, RouteRegistry,
};
use crate::application::store::StoreError;
use crate::infra::error::InfraError;

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => AppError::from(InfraError::database(err.to_string())).into_response(),
    }
}

/// Map a store error to a consistent HTTP error response, tagged with the
/// handler it surfaced from. Status and public message come from the shared
/// application-level mapping.
pub fn store_error_to_http(source: &'static str, err: StoreError) -> HttpError {
    let err = AppError::from(err);
    HttpError::from_error(source, err.status_code(), err.presentation_message(), &err)
}

/// Controller lookup over the fixed set of names this binary registers.
/// Axum has no runtime controller reflection, so the composition root
/// declares the set up front; probes stay async to match hosts where the
/// lookup is a real registry call.
pub struct StaticControllerLookup {
    names: BTreeSet<String>,
}

impl StaticControllerLookup {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| name.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl ControllerLookup for StaticControllerLookup {
    async fn resolve_controller(&self, name: &str) -> Result<ControllerResolution, LookupError> {
        if self.names.contains(&name.to_ascii_lowercase()) {
            Ok(ControllerResolution::Resolved)
        } else {
            Ok(ControllerResolution::Absent)
        }
    }
}

/// Snapshot of the registered route table, fixed at composition time.
pub struct StaticRouteTable {
    routes: Vec<RegisteredRoute>,
}

impl StaticRouteTable {
    pub fn new(routes: Vec<RegisteredRoute>) -> Self {
        Self { routes }
    }
}

impl RouteRegistry for StaticRouteTable {
    fn routes(&self) -> Vec<RegisteredRoute> {
        self.routes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::path::PathError;

    #[tokio::test]
    async fn static_lookup_ignores_case() {
        let lookup = StaticControllerLookup::new(["Content", "_health"]);
        assert_eq!(
            lookup.resolve_controller("content").await.unwrap(),
            ControllerResolution::Resolved
        );
        assert_eq!(
            lookup.resolve_controller("CONTENT").await.unwrap(),
            ControllerResolution::Resolved
        );
        assert_eq!(
            lookup.resolve_controller("missing").await.unwrap(),
            ControllerResolution::Absent
        );
    }

    #[test]
    fn path_escapes_map_to_forbidden() {
        let err = StoreError::Path(PathError::EscapesRoot {
            path: "/etc/passwd".to_string(),
        });
        let response = store_error_to_http("infra::http::tests", err).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
