use api::{build_router, build_state};
use config::{AppConfig, LoggingConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Load configuration first to get logging settings
    let config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Application cannot start without a valid configuration file.");
        std::process::exit(1);
    });
    let config = Arc::new(config);

    init_tracing(&config.logging);

    let state = build_state(config.clone()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to initialize authentication components");
        std::process::exit(1);
    });

    // Warm the JWKS cache; first verification refreshes again on a miss.
    if let Err(e) = state.keys.refresh().await {
        tracing::warn!(error = %e, "initial JWKS fetch failed, keys will load on first request");
    }

    // Periodic JWKS refresh
    let keys = state.keys.clone();
    let refresh_interval = config.jwks.refresh_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(refresh_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = keys.refresh().await {
                tracing::warn!(error = %e, "periodic JWKS refresh failed");
            }
        }
    });

    // Periodic cleanup of expired sessions and abandoned login attempts
    let sessions = state.sessions.clone();
    let login = state.login.clone();
    let sweep_interval = config.session.sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            let swept_sessions = sessions.sweep().await;
            let swept_logins = login.sweep_pending().await;
            tracing::debug!(swept_sessions, swept_logins, "expired entries swept");
        }
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, address = %bind_address, "Failed to bind server address");
            std::process::exit(1);
        });

    tracing::info!(address = %bind_address, "Server started successfully");
    tracing::info!(issuer = %config.oidc.issuer_url, "Identity provider configured");
    tracing::info!("Browser Endpoints:");
    tracing::info!("  - GET  /            (Home)");
    tracing::info!("  - GET  /login       (Login page)");
    tracing::info!("  - GET  /login/start (Redirect to identity provider)");
    tracing::info!("  - GET  /login/callback (Provider callback)");
    tracing::info!("  - GET  /dashboard   (Session-gated dashboard)");
    tracing::info!("  - POST /logout      (Destroy session)");
    tracing::info!("API Endpoints:");
    tracing::info!("  - GET  /api/user/profile (Profile from token claims)");
    tracing::info!("  - GET  /api/user/claims  (Raw token claims)");
    tracing::info!("  - POST /api/auth/token   (Session to bearer token)");
    tracing::info!("  - GET  /api/protected    (Any authenticated caller)");
    tracing::info!("  - GET  /api/user/data    (Role USER)");
    tracing::info!("  - GET  /api/admin/data   (Role ADMIN)");
    tracing::info!("  - GET  /api/health       (Public health check)");
    tracing::info!("  - POST /api/echo         (Authenticated echo)");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server exited with an error");
        std::process::exit(1);
    }
}

fn init_tracing(logging_config: &LoggingConfig) {
    // Build the filter string from the logging configuration
    let mut filter = logging_config.level.clone();

    for (module, level) in &logging_config.modules {
        filter.push_str(&format!(",{}={}", module, level));
    }

    // Initialize tracing based on the format specified in config
    match logging_config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .init();
        }
    }
}
