//! Logging and tracing configuration for the wallet gateway
//!
//! Structured JSON output in production, human-readable output in
//! development. Also hosts the masking helpers used wherever account
//! numbers or raw processor payloads reach a log line.

use std::env;
use std::sync::LazyLock;

use regex::Regex;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Detect environment from `ENVIRONMENT` (or `ENV`)
    pub fn from_env() -> Self {
        Self::parse(
            &env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging | Self::Production => Level::INFO,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

fn default_filter(environment: Environment) -> EnvFilter {
    let directives = format!(
        "{}={},tower_http=debug,axum=debug,sqlx=warn,hyper=warn,reqwest=warn",
        env!("CARGO_PKG_NAME").replace('-', "_"),
        environment.default_log_level()
    );
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the tracing subscriber.
///
/// # Environment Variables
/// - `ENVIRONMENT` or `ENV`: "production", "staging" or "development"
/// - `RUST_LOG`: overrides the filter
/// - `LOG_FORMAT`: force "json" or "pretty"
///
/// ```no_run
/// wallet_gateway::logging::init_tracing();
/// ```
pub fn init_tracing() {
    let environment = Environment::from_env();
    let use_json = env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or_else(|_| environment.is_production());
    let env_filter = default_filter(environment);

    if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).init();
    }

    tracing::info!(
        environment = ?environment,
        format = if use_json { "json" } else { "pretty" },
        "Tracing initialized"
    );
}

/// Mask a bank or virtual account number, keeping the last four digits.
///
/// ```
/// use wallet_gateway::logging::mask_account_number;
/// assert_eq!(mask_account_number("0123456789"), "******6789");
/// assert_eq!(mask_account_number("123"), "****");
/// ```
pub fn mask_account_number(account_number: &str) -> String {
    let chars: Vec<char> = account_number.trim().chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

const SENSITIVE_KEYS: [&str; 14] = [
    "secret",
    "secret_key",
    "secretKey",
    "password",
    "token",
    "api_key",
    "apiKey",
    "authorization",
    "access_code",
    "card_number",
    "cardNumber",
    "cvv",
    "pin",
    "bvn",
];

/// `(pattern, replacement)` per key, double- and single-quoted forms.
static REDACTIONS: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    SENSITIVE_KEYS
        .iter()
        .flat_map(|key| {
            [
                format!(r#""{}":\s*"[^"]*""#, key),
                format!(r#"'{}': '[^']*'"#, key),
            ]
            .into_iter()
            .filter_map(|pattern| Regex::new(&pattern).ok())
            .map(move |re| (re, format!(r#""{}": "[REDACTED]""#, key)))
        })
        .collect()
});

/// Redact secrets and card data from JSON-like text before it is logged.
pub fn redact_sensitive_data(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in REDACTIONS.iter() {
        if re.is_match(&result) {
            result = re.replace_all(&result, replacement.as_str()).into_owned();
        }
    }
    result
}

/// Log a ledger-affecting event with a consistent `event_type`.
///
/// ```no_run
/// use wallet_gateway::log_transaction;
/// log_transaction!(
///     event = "deposit_credited",
///     reference = "DEP_0f3c",
///     amount = 500_000,
///     status = "completed",
/// );
/// ```
#[macro_export]
macro_rules! log_transaction {
    ($($key:tt = $value:expr),* $(,)?) => {
        tracing::info!(
            event_type = "transaction",
            $($key = tracing::field::debug(&$value)),*
        );
    };
}

/// Log a performance metric at debug level.
///
/// ```no_run
/// use wallet_gateway::log_performance;
/// log_performance!(operation = "reconciliation_sweep", duration_ms = 145);
/// ```
#[macro_export]
macro_rules! log_performance {
    ($($key:tt = $value:expr),* $(,)?) => {
        tracing::debug!(
            event_type = "performance",
            $($key = tracing::field::debug(&$value)),*
        );
    };
}

/// Create an info span carrying request context.
///
/// ```no_run
/// use wallet_gateway::request_span;
/// let span = request_span!("webhook_ingest", reference = "DEP_0f3c");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! request_span {
    ($name:expr, $($key:tt = $value:expr),* $(,)?) => {
        tracing::info_span!(
            $name,
            $($key = tracing::field::debug(&$value)),*
        )
    };
}
