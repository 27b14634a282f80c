//! Application configuration
//!
//! Built once at startup from (lowest to highest precedence) compiled
//! defaults, an optional `config/wallet.{toml,yaml,json}` file, and
//! `WALLET__<SECTION>__<KEY>` environment variables, then shared by `Arc`.
//! Business modules receive the sections they need and never read the
//! environment themselves.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub webhook: WebhookConfig,
    pub reconciliation: ReconciliationConfig,
    pub limits: LimitsConfig,
    pub merchant: MerchantConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: LedgerBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayProvider {
    Http,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub provider: GatewayProvider,
    pub name: String,
    pub base_url: String,
    pub secret_key: String,
    pub callback_url: Option<String>,
    pub preferred_bank: Option<String>,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub secret: String,
    pub signature_header: String,
    pub require_signature: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub sweep_interval_secs: u64,
    pub min_pending_age_secs: u64,
    pub batch_size: i64,
    /// Deposits the processor has never heard of are failed after this long.
    pub abandon_unpaid_deposits_after_secs: u64,
}

/// Amount limits in minor units.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_deposit: i64,
    pub max_deposit: i64,
    pub min_withdrawal: i64,
    pub max_withdrawal: i64,
    pub withdrawal_fee: i64,
    pub max_service_purchase: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MerchantConfig {
    pub name: String,
    pub support_email: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 64 * 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Postgres,
            url: "postgres://localhost/wallet_gateway".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: GatewayProvider::Http,
            name: "paystack".to_string(),
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            callback_url: None,
            preferred_bank: None,
            timeout_secs: 15,
            connect_timeout_secs: 5,
            currency: "NGN".to_string(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            signature_header: "x-gateway-signature".to_string(),
            require_signature: true,
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 60,
            min_pending_age_secs: 120,
            batch_size: 50,
            abandon_unpaid_deposits_after_secs: 24 * 60 * 60,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_deposit: 100_00,
            max_deposit: 10_000_000_00,
            min_withdrawal: 100_00,
            max_withdrawal: 5_000_000_00,
            withdrawal_fee: 0,
            max_service_purchase: 50_000_00,
        }
    }
}

impl Default for MerchantConfig {
    fn default() -> Self {
        Self {
            name: "Wallet Gateway".to_string(),
            support_email: "support@example.com".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Load from the optional config file and `WALLET__*` environment.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/wallet").required(false))
            .add_source(
                config::Environment::with_prefix("WALLET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.provider == GatewayProvider::Http && self.gateway.secret_key.is_empty() {
            return Err(ConfigError::Invalid(
                "gateway.secret_key is required for the http provider".into(),
            ));
        }
        if self.gateway.timeout_secs == 0 || self.gateway.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway timeouts must be greater than zero".into(),
            ));
        }
        if self.reconciliation.sweep_interval_secs == 0 || self.reconciliation.batch_size <= 0 {
            return Err(ConfigError::Invalid(
                "reconciliation interval and batch size must be positive".into(),
            ));
        }
        if self.limits.min_deposit <= 0 || self.limits.min_deposit > self.limits.max_deposit {
            return Err(ConfigError::Invalid(
                "limits.min_deposit must be positive and not exceed max_deposit".into(),
            ));
        }
        if self.limits.min_withdrawal <= 0
            || self.limits.min_withdrawal > self.limits.max_withdrawal
        {
            return Err(ConfigError::Invalid(
                "limits.min_withdrawal must be positive and not exceed max_withdrawal".into(),
            ));
        }
        if self.limits.withdrawal_fee < 0 {
            return Err(ConfigError::Invalid("limits.withdrawal_fee must not be negative".into()));
        }
        if self.database.backend == LedgerBackend::Postgres
            && !(self.database.url.starts_with("postgres://")
                || self.database.url.starts_with("postgresql://"))
        {
            return Err(ConfigError::Invalid(
                "database.url must be a postgres:// URL for the postgres backend".into(),
            ));
        }
        if self.webhook.require_signature && self.webhook.secret.is_empty() {
            return Err(ConfigError::Invalid(
                "webhook.secret is required when signatures are enforced".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.webhook.secret = "whsec".into();
        cfg.gateway.secret_key = "sk_test_x".into();
        cfg
    }

    #[test]
    fn defaults_target_real_backends_and_require_secrets() {
        let defaults = AppConfig::default();
        assert_eq!(defaults.gateway.provider, GatewayProvider::Http);
        assert_eq!(defaults.database.backend, LedgerBackend::Postgres);
        assert!(defaults.validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn http_provider_requires_secret_key() {
        let mut cfg = valid();
        cfg.gateway.secret_key.clear();
        assert!(cfg.validate().is_err());
        cfg.gateway.provider = GatewayProvider::Mock;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_limits() {
        let mut cfg = valid();
        cfg.limits.min_deposit = cfg.limits.max_deposit + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn postgres_backend_requires_postgres_url() {
        let mut cfg = valid();
        cfg.database.backend = LedgerBackend::Postgres;
        cfg.database.url = "mysql://localhost/db".into();
        assert!(cfg.validate().is_err());
        cfg.database.url = "postgresql://localhost/db".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserializes_partial_sources_over_defaults() {
        let settings = config::Config::builder()
            .set_override("gateway.timeout_secs", 3)
            .unwrap()
            .set_override("limits.withdrawal_fee", 2500)
            .unwrap()
            .build()
            .unwrap();
        let cfg: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(cfg.gateway.timeout_secs, 3);
        assert_eq!(cfg.limits.withdrawal_fee, 2500);
        assert_eq!(cfg.gateway.currency, "NGN");
        assert_eq!(cfg.reconciliation.batch_size, 50);
    }
}
