use std::env;

use thiserror::Error;

use crate::gifts::{Prize, PrizeTable};
use crate::ledger::UserId;
use crate::transfers::FeePolicy;

/// Runtime settings, read once at startup. A missing or malformed value
/// fails construction; nothing here is re-read after boot.
#[derive(Clone, Debug)]
pub struct Config {
    pub currency: String,
    pub operator_id: UserId,
    pub fee_policy: FeePolicy,
    pub fee_sink_user_id: Option<UserId>,
    pub roll_price: u64,
    pub subscription_price: u64,
    pub subscription_period_days: u32,
    pub prize_table: PrizeTable,
    pub gateway_base_url: Option<String>,
    pub gateway_auth_token: Option<String>,
    pub gateway_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("STARBANK_OPERATOR_ID is required")]
    MissingOperatorId,
    #[error("invalid STARBANK_OPERATOR_ID: {0}")]
    InvalidOperatorId(String),
    #[error("invalid STARBANK_CURRENCY: {0}")]
    InvalidCurrency(String),
    #[error("invalid transfer fee policy: {0}")]
    InvalidFeePolicy(String),
    #[error("invalid STARBANK_FEE_SINK_USER_ID: {0}")]
    InvalidFeeSinkUserId(String),
    #[error("invalid STARBANK_ROLL_PRICE: {0}")]
    InvalidRollPrice(String),
    #[error("invalid STARBANK_SUBSCRIPTION_PRICE: {0}")]
    InvalidSubscriptionPrice(String),
    #[error("invalid STARBANK_SUBSCRIPTION_PERIOD_DAYS: {0}")]
    InvalidSubscriptionPeriodDays(String),
    #[error("invalid STARBANK_PRIZE_TABLE_JSON: {0}")]
    InvalidPrizeTable(String),
    #[error("invalid STARBANK_GATEWAY_AUTH_TOKEN: {0}")]
    InvalidGatewayAuthToken(String),
    #[error("invalid STARBANK_GATEWAY_TIMEOUT_MS: {0}")]
    InvalidGatewayTimeoutMs(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let operator_id = lookup("STARBANK_OPERATOR_ID")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .ok_or(ConfigError::MissingOperatorId)?
            .parse::<UserId>()
            .map_err(|error| ConfigError::InvalidOperatorId(error.to_string()))?;
        if operator_id == 0 {
            return Err(ConfigError::InvalidOperatorId(
                "operator id must be positive".to_string(),
            ));
        }

        let currency = lookup("STARBANK_CURRENCY")
            .unwrap_or_else(|| "XTR".to_string())
            .trim()
            .to_ascii_uppercase();
        if currency.is_empty() {
            return Err(ConfigError::InvalidCurrency(
                "currency cannot be empty".to_string(),
            ));
        }

        let fee_threshold = parse_with_lookup(
            &lookup,
            "STARBANK_TRANSFER_FEE_THRESHOLD",
            FeePolicy::default().threshold(),
            |raw| {
                raw.trim().parse::<u64>().map_err(|error| {
                    ConfigError::InvalidFeePolicy(format!(
                        "STARBANK_TRANSFER_FEE_THRESHOLD: {error}"
                    ))
                })
            },
        )?;
        let fee_flat = parse_with_lookup(
            &lookup,
            "STARBANK_TRANSFER_FEE_FLAT",
            FeePolicy::default().flat(),
            |raw| {
                raw.trim().parse::<u64>().map_err(|error| {
                    ConfigError::InvalidFeePolicy(format!("STARBANK_TRANSFER_FEE_FLAT: {error}"))
                })
            },
        )?;
        let fee_policy = FeePolicy::new(fee_threshold, fee_flat)
            .map_err(|error| ConfigError::InvalidFeePolicy(error.to_string()))?;

        let fee_sink_user_id = match lookup("STARBANK_FEE_SINK_USER_ID")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
        {
            Some(raw) => {
                let sink = raw
                    .parse::<UserId>()
                    .map_err(|error| ConfigError::InvalidFeeSinkUserId(error.to_string()))?;
                if sink == 0 {
                    return Err(ConfigError::InvalidFeeSinkUserId(
                        "fee sink user id must be positive".to_string(),
                    ));
                }
                Some(sink)
            }
            None => None,
        };

        let roll_price = parse_with_lookup(&lookup, "STARBANK_ROLL_PRICE", 1, |raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidRollPrice(error.to_string()))
                .map(|value| value.max(1))
        })?;
        let subscription_price =
            parse_with_lookup(&lookup, "STARBANK_SUBSCRIPTION_PRICE", 25, |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|error| ConfigError::InvalidSubscriptionPrice(error.to_string()))
                    .map(|value| value.max(1))
            })?;
        let subscription_period_days =
            parse_with_lookup(&lookup, "STARBANK_SUBSCRIPTION_PERIOD_DAYS", 30, |raw| {
                raw.trim()
                    .parse::<u32>()
                    .map_err(|error| ConfigError::InvalidSubscriptionPeriodDays(error.to_string()))
                    .map(|value| value.clamp(1, 3650))
            })?;

        let prize_table = parse_with_lookup(
            &lookup,
            "STARBANK_PRIZE_TABLE_JSON",
            PrizeTable::default(),
            |raw| {
                let prizes: Vec<Prize> = serde_json::from_str(&raw)
                    .map_err(|error| ConfigError::InvalidPrizeTable(error.to_string()))?;
                PrizeTable::try_new(prizes)
                    .map_err(|error| ConfigError::InvalidPrizeTable(error.to_string()))
            },
        )?;

        let gateway_base_url = lookup("STARBANK_GATEWAY_BASE_URL")
            .map(|raw| raw.trim().trim_end_matches('/').to_string())
            .filter(|raw| !raw.is_empty());
        let gateway_auth_token = lookup("STARBANK_GATEWAY_AUTH_TOKEN")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());
        if gateway_base_url.is_some() && gateway_auth_token.is_none() {
            return Err(ConfigError::InvalidGatewayAuthToken(
                "gateway base url configured but auth token missing".to_string(),
            ));
        }

        let gateway_timeout_ms =
            parse_with_lookup(&lookup, "STARBANK_GATEWAY_TIMEOUT_MS", 12_000, |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|error| ConfigError::InvalidGatewayTimeoutMs(error.to_string()))
                    .map(|value| value.clamp(250, 120_000))
            })?;

        Ok(Self {
            currency,
            operator_id,
            fee_policy,
            fee_sink_user_id,
            roll_price,
            subscription_price,
            subscription_period_days,
            prize_table,
            gateway_base_url,
            gateway_auth_token,
            gateway_timeout_ms,
        })
    }
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}
