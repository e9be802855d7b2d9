//! Session Agent
//!
//! Keeps a session with the authentication service alive in the background.
//! Restores the stored session on start, optionally logs in with
//! `SESSION_USERNAME` / `SESSION_PASSWORD`, and logs every state change.
//! Credentials are kept on shutdown for the next start.

use common::config::{LogFormat, ObservabilityConfig, DEFAULT_LOG_FILTER};
use session_client::config::Config;
use session_client::services::HttpAuthClient;
use session_client::store::FileCredentialStore;
use session_client::{AuthState, SessionController};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.observability);

    info!("Starting session agent");

    info!(
        auth_base_url = %config.auth_base_url,
        credential_store = %config.credential_store_path.display(),
        refresh_margin_secs = config.session.refresh_margin.as_secs(),
        revalidate_interval_secs = config.session.revalidate_interval.as_secs(),
        "Configuration loaded successfully"
    );

    let store = Arc::new(FileCredentialStore::new(
        config.credential_store_path.clone(),
    ));
    let api = Arc::new(HttpAuthClient::new(config.auth_client_config()).map_err(|e| {
        error!("Failed to create authentication client: {}", e);
        e
    })?);
    let controller = SessionController::new(config.session, store, api)?;
    let mut receiver = controller.subscribe();

    controller.initialize().await;

    if !controller.state().is_authenticated {
        match &config.login {
            Some(login) => {
                match controller
                    .login_with_password(&login.username, &login.password)
                    .await
                {
                    Ok(()) => info!("Logged in"),
                    Err(e) => warn!("Login failed: {}", e),
                }
            }
            None => info!("No session; set SESSION_USERNAME and SESSION_PASSWORD to log in"),
        }
    }

    log_state(&controller.state());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            changed = receiver.changed() => match changed {
                Ok(state) => log_state(&state),
                Err(e) => {
                    error!("State channel closed: {}", e);
                    break;
                }
            },
        }
    }

    controller.shutdown();
    info!("Session agent stopped");

    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_new(&observability.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match observability.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

fn log_state(state: &AuthState) {
    info!(
        authenticated = state.is_authenticated,
        refreshing = state.is_refreshing,
        has_profile = state.user.is_some(),
        access = ?state.access_decision(),
        "Session state"
    );
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, shutting down..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, shutting down...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
