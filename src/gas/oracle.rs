//! Blocknative block-prices client.
//!
//! Any failure to read a usable estimate is reported as [`OracleUnavailable`]
//! internally and turned into the fallback tip: a missed fee optimization is
//! acceptable, a skipped execution is not.

use super::GasEstimate;
use crate::config::consts::BLOCK_PRICES_PATH;
use alloy::primitives::utils::{format_units, parse_units};
use anyhow::Context;
use reqwest::{Client, StatusCode, header::AUTHORIZATION};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confidence tiers published by Blocknative, in the order of `estimatedPrices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfidenceTier {
    #[value(name = "99")]
    P99,
    #[value(name = "95")]
    P95,
    #[value(name = "90")]
    P90,
    #[value(name = "80")]
    P80,
    #[value(name = "70")]
    P70,
}

impl ConfidenceTier {
    pub fn percent(&self) -> u8 {
        match self {
            ConfidenceTier::P99 => 99,
            ConfidenceTier::P95 => 95,
            ConfidenceTier::P90 => 90,
            ConfidenceTier::P80 => 80,
            ConfidenceTier::P70 => 70,
        }
    }

    /// Position of the tier in `estimatedPrices`
    pub fn index(&self) -> usize {
        match self {
            ConfidenceTier::P99 => 0,
            ConfidenceTier::P95 => 1,
            ConfidenceTier::P90 => 2,
            ConfidenceTier::P80 => 3,
            ConfidenceTier::P70 => 4,
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleUnavailable {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("empty response body")]
    EmptyBody,
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockPricesResponse {
    block_prices: Vec<BlockPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockPrice {
    estimated_prices: Vec<EstimatedPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstimatedPrice {
    #[serde(default)]
    confidence: Option<f64>,
    max_priority_fee_per_gas: serde_json::Number,
}

/// Fetches the initial priority fee from the Blocknative gas platform
#[derive(Clone)]
pub struct GasOracleClient {
    http: Client,
    url: String,
    api_key: String,
    tier: ConfidenceTier,
}

impl GasOracleClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        tier: ConfidenceTier,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build gas oracle HTTP client")?;
        let url = format!("{}{}", base_url.trim_end_matches('/'), BLOCK_PRICES_PATH);
        Ok(Self {
            http,
            url,
            api_key,
            tier,
        })
    }

    /// Never fails: oracle problems are logged and yield the fallback estimate.
    pub async fn fetch_initial_priority_fee(&self) -> GasEstimate {
        match self.try_fetch().await {
            Ok(tip) => {
                let estimate = GasEstimate::from_oracle(tip);
                info!(
                    confidence = %self.tier,
                    tip_gwei = %format_units(estimate.priority_fee(), "gwei").unwrap_or_default(),
                    "Using Blocknative priority fee"
                );
                estimate
            }
            Err(e) => {
                let estimate = GasEstimate::fallback();
                warn!(
                    error = %e,
                    tip_gwei = %format_units(estimate.priority_fee(), "gwei").unwrap_or_default(),
                    "Gas oracle unavailable, using fallback priority fee"
                );
                estimate
            }
        }
    }

    async fn try_fetch(&self) -> Result<u128, OracleUnavailable> {
        let response = self
            .http
            .get(&self.url)
            .header(AUTHORIZATION, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleUnavailable::Status(status));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(OracleUnavailable::EmptyBody);
        }

        let parsed: BlockPricesResponse = serde_json::from_slice(&body)
            .map_err(|e| OracleUnavailable::Malformed(e.to_string()))?;
        let prices = &parsed
            .block_prices
            .first()
            .ok_or_else(|| OracleUnavailable::Malformed("no blockPrices".to_string()))?
            .estimated_prices;

        let percent = f64::from(self.tier.percent());
        let selected = prices
            .iter()
            .find(|p| p.confidence == Some(percent))
            .or_else(|| prices.get(self.tier.index()))
            .ok_or_else(|| {
                OracleUnavailable::Malformed(format!("no estimate for {} confidence", self.tier))
            })?;
        debug!(confidence = ?selected.confidence, tip = %selected.max_priority_fee_per_gas, "Selected oracle estimate");

        gwei_to_wei(&selected.max_priority_fee_per_gas)
    }
}

/// Exact decimal conversion, e.g. `12.0` gwei -> `12_000_000_000` wei.
fn gwei_to_wei(value: &serde_json::Number) -> Result<u128, OracleUnavailable> {
    let text = value.to_string();
    if text.starts_with('-') {
        return Err(OracleUnavailable::Malformed(format!("negative tip {text}")));
    }
    let wei = parse_units(&text, "gwei")
        .map_err(|e| OracleUnavailable::Malformed(format!("tip {text}: {e}")))?
        .get_absolute();
    u128::try_from(wei).map_err(|_| OracleUnavailable::Malformed(format!("tip {text} overflows")))
}
