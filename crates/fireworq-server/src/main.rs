//! Process shell: load configuration, wire up the service and HTTP
//! surface, and manage the process lifecycle. Grounded on
//! `cyclotron-janitor/src/main.rs`'s overall shape (config → tracing →
//! spawn → select on exit) and on the Go fireworq daemon's `main.go`
//! and `web/application.go`'s `Serve()` for the exact signal set and
//! the shutdown-timeout race between the HTTP server's graceful drain
//! and the job dispatcher's own `Stop()`.

use envconfig::Envconfig;
use fireworq_server::app_context::AppContext;
use fireworq_server::config::Config;
use fireworq_server::http;
use fireworq_server::logging::ReopenableWriter;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().expect("failed to load configuration from environment");

    let log_writer = ReopenableWriter::open(&config.error_log).expect("failed to open error log file");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(log_writer.clone())
        .init();

    info!(pid = std::process::id(), "Starting a job dispatcher...");
    write_pid_file(&config.pid);

    let version = format!("Fireworq {}", env!("CARGO_PKG_VERSION"));
    let context = AppContext::new(&config, version).await.expect("failed to initialize application");

    let bind = config.bind.clone();
    let shutdown_timeout = config.shutdown_timeout();

    let app = http::app(context.clone()).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&bind).await.expect("failed to bind listener");
    info!(%bind, "Listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    wait_for_shutdown_signal(log_writer).await;
    let _ = shutdown_tx.send(());
    tokio::spawn(force_exit_on_second_signal());

    if let Err(e) = server.await.expect("http server task panicked") {
        warn!(error = %e, "Stopped the HTTP server");
    }

    info!(timeout = ?shutdown_timeout, "Stopping the job dispatcher...");
    tokio::select! {
        _ = tokio::time::sleep(shutdown_timeout) => {
            warn!("Stopped the job dispatcher: deadline exceeded");
        }
        _ = context.service.stop() => {
            info!("Stopped the job dispatcher");
        }
    }

    Ok(())
}

fn write_pid_file(path: &str) {
    if path.is_empty() {
        return;
    }
    if let Some(dir) = std::path::Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                error!(error = %e, "Failed to create PID file directory");
                return;
            }
        }
    }
    if let Err(e) = std::fs::write(path, format!("{}\n", std::process::id())) {
        error!(error = %e, "Failed to write PID file");
    }
}

/// Waits for the first `SIGTERM`/`SIGINT`/`SIGHUP`, reopening log files
/// on every `SIGUSR1` received in the meantime.
#[cfg(unix)]
async fn wait_for_shutdown_signal(log_writer: ReopenableWriter) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut sigusr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");

    loop {
        tokio::select! {
            _ = sigterm.recv() => { info!("Received SIGTERM"); return; }
            _ = sigint.recv() => { info!("Received SIGINT"); return; }
            _ = sighup.recv() => { info!("Received SIGHUP"); return; }
            _ = sigusr1.recv() => {
                info!("Received SIGUSR1; reopening log files");
                if let Err(e) = log_writer.reopen() {
                    error!(error = %e, "Failed to reopen log file");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(_log_writer: ReopenableWriter) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal");
}

/// A second termination signal during drain closes the process
/// immediately, abandoning any in-flight workers; those jobs are later
/// picked up by orphan recovery.
#[cfg(unix)]
async fn force_exit_on_second_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
        _ = sighup.recv() => {}
    }
    error!("Received a second termination signal; exiting immediately");
    std::process::exit(1);
}

#[cfg(not(unix))]
async fn force_exit_on_second_signal() {
    let _ = tokio::signal::ctrl_c().await;
    std::process::exit(1);
}
