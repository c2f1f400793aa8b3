//! # Structured Logging Module
//!
//! Environment-aware console logging built on `tracing-subscriber`, plus
//! domain helpers that keep the field names of message, order and broker
//! events consistent across the engine.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs a subscriber and
/// an already-installed global subscriber (e.g. from a host application) is
/// left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json_output = use_json_format();
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let json_layer = json_output.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(build_filter(&log_level))
        });
        let console_layer = (!json_output).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(build_filter(&log_level))
        });

        let subscriber = tracing_subscriber::registry()
            .with(json_layer)
            .with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                json = json_output,
                ansi_colors = use_ansi,
                "Structured logging initialized"
            );
        }
    });
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn use_json_format() -> bool {
    std::env::var("CURATOR_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Get current environment from environment variables
pub(crate) fn get_environment() -> String {
    std::env::var("CURATOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" | "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a message lifecycle transition (received, decided, done, discarded)
pub fn log_message_operation(
    operation: &str,
    queue: &str,
    oid: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        queue = %queue,
        oid = oid,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "MESSAGE_OPERATION"
    );
}

/// Log the outcome of one order inside a batch
pub fn log_order_operation(
    order_index: usize,
    order_type: &str,
    oid: Option<&str>,
    target: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        order_index = order_index,
        order_type = %order_type,
        oid = oid,
        target = target,
        status = %status,
        details = details,
        "ORDER_OPERATION"
    );
}

/// Log broker connection and delivery events
pub fn log_broker_operation(
    operation: &str,
    broker: &str,
    queue: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        broker = %broker,
        queue = queue,
        status = %status,
        details = details,
        "BROKER_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
