use anyhow::Result;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::FeeCatalog;
use crate::services::gateway::GatewayPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub fees: FeeSettings,
    pub receipts: ReceiptConfig,
    pub smtp: SmtpConfig,
    pub catalog: FeeCatalog,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// When unset the service runs on the in-memory store (dev/test mode).
    pub url: Option<Secret<String>>,
    pub db_name: String,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub decline_rate: f64,
    pub card_otp_rate: f64,
    pub otp_success_rate: f64,
    pub settle_success_rate: f64,
    pub latency_ms: u64,
    pub seed: Option<u64>,
}

impl GatewayConfig {
    pub fn policy(&self) -> GatewayPolicy {
        GatewayPolicy {
            decline_rate: self.decline_rate,
            card_otp_rate: self.card_otp_rate,
            otp_success_rate: self.otp_success_rate,
            settle_success_rate: self.settle_success_rate,
            latency: Duration::from_millis(self.latency_ms),
            seed: self.seed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FeeSettings {
    /// Percentage added to the total when paying in more than one
    /// installment.
    pub surcharge_pct: Decimal,
    pub max_installments: u32,
}

#[derive(Clone, Debug)]
pub struct ReceiptConfig {
    pub dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("FEE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("FEE_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let db_url = env::var("FEE_DATABASE_URL").ok().map(Secret::new);
        let db_name =
            env::var("FEE_DATABASE_NAME").unwrap_or_else(|_| "fee_payment_db".to_string());

        let gateway = GatewayConfig {
            decline_rate: parse_or("GATEWAY_DECLINE_RATE", 0.10)?,
            card_otp_rate: parse_or("GATEWAY_CARD_OTP_RATE", 0.80)?,
            otp_success_rate: parse_or("GATEWAY_OTP_SUCCESS_RATE", 0.95)?,
            settle_success_rate: parse_or("GATEWAY_SETTLE_SUCCESS_RATE", 0.95)?,
            latency_ms: parse_or("GATEWAY_LATENCY_MS", 400)?,
            seed: env::var("GATEWAY_SEED").ok().map(|s| s.parse()).transpose()?,
        };

        let fees = FeeSettings {
            surcharge_pct: env::var("FEE_SURCHARGE_PCT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            max_installments: parse_or("FEE_MAX_INSTALLMENTS", 4)?,
        };

        let receipts = ReceiptConfig {
            dir: PathBuf::from(
                env::var("RECEIPT_DIR").unwrap_or_else(|_| "./receipts".to_string()),
            ),
        };

        let smtp = SmtpConfig {
            enabled: env::var("SMTP_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            port: parse_or("SMTP_PORT", 587)?,
            user: env::var("SMTP_USER").unwrap_or_default(),
            password: Secret::new(env::var("SMTP_PASSWORD").unwrap_or_default()),
            from_email: env::var("SMTP_FROM_EMAIL")
                .unwrap_or_else(|_| "accounts@campus.example".to_string()),
            from_name: env::var("SMTP_FROM_NAME")
                .unwrap_or_else(|_| "Accounts Office".to_string()),
        };

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: db_url,
                db_name,
            },
            gateway,
            fees,
            receipts,
            smtp,
            catalog: FeeCatalog::default(),
            service_name: "fee-payment-service".to_string(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}
