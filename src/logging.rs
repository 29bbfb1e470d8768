use std::env;
use tracing_subscriber::{fmt, EnvFilter};

/// Third-party targets kept at warn unless RUST_LOG says otherwise.
const QUIET_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "reqwest", "hyper"];

pub fn setup_logging() {
    // LOG_LEVEL applies to this crate when RUST_LOG is not set
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![
            format!("taskdesk_notifier={}", log_level),
            // Reconnect churn is noisy; keep it down unless asked for
            "taskdesk_notifier::connection=warn".to_string(),
        ];
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)));
        EnvFilter::new(directives.join(","))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    tracing::info!("Logging initialized");
}
