use std::{process, sync::Arc, time::Duration};

use stampa::{
    application::{
        error::AppError,
        pipeline::{HtmlRenderer, LogRetention, PdfService},
        templates::TemplateStore,
    },
    config,
    infra::{browser::ChromiumSession, error::InfraError, http, telemetry},
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    // The rolling appender needs the directory before the subscriber installs.
    std::fs::create_dir_all(&settings.logging.directory)
        .map_err(|err| AppError::from(InfraError::Io(err)))?;
    let _telemetry = telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let session = ChromiumSession::launch(&settings.browser)
        .await
        .map_err(|err| AppError::from(InfraError::browser(err.to_string())))?;
    let renderer: Arc<dyn HtmlRenderer> = Arc::new(session);
    info!(target = "stampa::server", "browser session launched");

    let default_host = format!("http://127.0.0.1:{}", settings.server.public_addr.port());
    let retention = LogRetention {
        directory: settings.logging.directory.clone(),
        ceiling_bytes: settings.logging.max_directory_bytes.get(),
    };
    let pdf = Arc::new(PdfService::new(renderer, retention, default_host));
    let templates = Arc::new(TemplateStore::new(settings.templates.views_root.clone()));

    let state = http::HttpState { pdf, templates };
    let router = http::build_router(state, settings.server.max_request_bytes.get() as usize);

    let listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;
    info!(
        target = "stampa::server",
        addr = %settings.server.public_addr,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!(target = "stampa::server", "shutdown signal listener failed");
        return;
    }
    info!(
        target = "stampa::server",
        grace_secs = grace.as_secs(),
        "shutdown signal received"
    );

    // Bound the drain phase: in-flight renders past the grace period are
    // abandoned with the process.
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(
            target = "stampa::server",
            "graceful shutdown grace period elapsed; exiting"
        );
        process::exit(0);
    });
}
