use std::{process, sync::Arc};

use teca::{
    application::{
        error::AppError,
        fallback::{RegisteredRoute, RouteFallbackResolver},
        store::{ContentHistory, ContentStore},
    },
    config::{self, StorageBackend},
    infra::{
        db::SqlContentStore,
        error::InfraError,
        file_store::FileContentStore,
        http::{self, HttpState, StaticControllerLookup, StaticRouteTable},
        mirror::LocalCacheMirror,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = build_http_state(&settings).await?;
    serve_http(&settings, state).await
}

async fn build_http_state(settings: &config::Settings) -> Result<HttpState, AppError> {
    let default_host = settings.content.default_host.clone();
    let content_route = settings.content.route.clone();

    let (store, history, db): (
        Arc<dyn ContentStore>,
        Option<Arc<dyn ContentHistory>>,
        Option<Arc<SqlContentStore>>,
    ) = match settings.storage.backend {
        StorageBackend::File => {
            tokio::fs::create_dir_all(&settings.storage.root)
                .await
                .map_err(|err| AppError::from(InfraError::Io(err)))?;
            let store = Arc::new(
                FileContentStore::new(settings.storage.root.clone(), default_host.clone())
                    .map_err(AppError::from)?,
            );
            info!(
                target = "teca::serve",
                backend = "file",
                root = %settings.storage.root.display(),
                "Content backend ready"
            );
            (store, None, None)
        }
        StorageBackend::Sql => {
            let database_url = settings
                .database
                .url
                .as_ref()
                .ok_or_else(|| InfraError::configuration("database url is not configured"))
                .map_err(AppError::from)?;

            let pool =
                SqlContentStore::connect(database_url, settings.database.max_connections.get())
                    .await
                    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

            let store = SqlContentStore::new(
                pool,
                settings.storage.table.clone(),
                default_host.clone(),
            )
            .map_err(AppError::from)?;
            store.ensure_schema().await.map_err(AppError::from)?;

            let store = match settings.storage.cache_dir.as_ref() {
                Some(cache_dir) => {
                    tokio::fs::create_dir_all(cache_dir)
                        .await
                        .map_err(|err| AppError::from(InfraError::Io(err)))?;
                    let mirror = LocalCacheMirror::new(cache_dir.clone(), default_host.clone())
                        .map_err(AppError::from)?;
                    store.with_mirror(mirror)
                }
                None => store,
            };

            info!(
                target = "teca::serve",
                backend = "sql",
                table = %settings.storage.table,
                mirrored = settings.storage.cache_dir.is_some(),
                "Content backend ready"
            );

            let store = Arc::new(store);
            (
                store.clone() as Arc<dyn ContentStore>,
                Some(store.clone() as Arc<dyn ContentHistory>),
                Some(store),
            )
        }
    };

    let fallback = build_fallback_resolver(&content_route);

    Ok(HttpState {
        store,
        history,
        db,
        fallback,
        content_route,
        default_host,
    })
}

/// Seed the fallback engine with the names and routes this binary registers.
fn build_fallback_resolver(content_route: &str) -> Arc<RouteFallbackResolver> {
    let lookup = Arc::new(StaticControllerLookup::new([content_route, "_health"]));
    let registry = Arc::new(StaticRouteTable::new(vec![RegisteredRoute {
        pattern: format!("{content_route}/{{*path}}"),
        default_controller: content_route.to_string(),
    }]));

    Arc::new(RouteFallbackResolver::new(lookup, registry, content_route))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "teca::serve",
        addr = %settings.server.addr,
        "Listening for content requests"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
