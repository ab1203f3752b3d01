use std::process;

use relaycache::{
    cache::CacheState,
    config::{self, InspectArgs},
    error::AppError,
    infra::{self, error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::Inspect(args) => run_inspect(&settings, &args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = infra::store::build_cache_state(&settings).await?;
    serve_http(&settings, cache).await
}

/// Print the keys a write to `args.endpoint` evicts; needs no store connection.
fn run_inspect(settings: &config::Settings, args: &InspectArgs) -> Result<(), AppError> {
    let groups = relaycache::cache::CacheGroupIndex::from(&settings.cache);
    let indexes = groups.related_group_indexes(&args.endpoint);
    if indexes.is_empty() {
        println!("{} belongs to no cache group", args.endpoint);
        return Ok(());
    }

    let prefix = &settings.cache.prefix;
    println!(
        "{} belongs to groups {:?}; a write evicts:",
        args.endpoint, indexes
    );
    for member in groups.related_endpoints(&args.endpoint) {
        println!(
            "  {}",
            relaycache::cache::CacheKey::new(prefix, &args.host, member)
        );
    }
    Ok(())
}

async fn serve_http(settings: &config::Settings, cache: CacheState) -> Result<(), AppError> {
    let router = infra::http::build_router(cache);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "relaycache::serve",
        addr = %settings.server.addr,
        "listening"
    );

    let grace = settings.server.graceful_shutdown;
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "relaycache::serve",
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "relaycache::serve", "shutdown signal received");
}
