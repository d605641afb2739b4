use crate::config::consts::{
    DEFAULT_BLOCKNATIVE_URL, DEFAULT_D3M_ADDRESS, DEFAULT_GAS_EVERY_SECS,
    DEFAULT_GAS_GROWTH_RATIO, DEFAULT_HELPER_ADDRESS, DEFAULT_MAX_PRIORITY_FEE_GWEI,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_RPC_TIMEOUT_SECS, DEFAULT_THRESHOLD_WEI,
    DEFAULT_TX_TIMEOUT_SECS, FALLBACK_PRIORITY_FEE_WEI,
};
use crate::gas::{ConfidenceTier, GeometricGasPrice, GrowthRatio};
use crate::submitter::SubmitterSettings;
use crate::wallet::{SigningContext, load_signer};
use alloy::primitives::{Address, U256, utils::parse_units};
use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use std::time::Duration;
use tracing::info;

/// CLI arguments for the keeper
#[derive(Parser, Debug)]
#[command(name = "d3m-keeper")]
#[command(
    about = "D3M Keeper - calls exec() on the D3M hub when the helper reports it is due",
    long_about = None
)]
pub struct CliArgs {
    /// Ethereum JSON-RPC endpoint
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// Per-request timeout for RPC calls, in seconds
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = DEFAULT_RPC_TIMEOUT_SECS)]
    pub rpc_timeout_secs: u64,

    /// Sending account; must be the address of the private key
    #[arg(long, env = "ETH_FROM")]
    pub eth_from: Address,

    /// Private key of the sending account
    #[arg(long, alias = "eth-private-key", env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// D3M hub contract address
    #[arg(long, env = "D3M_ADDRESS", default_value = DEFAULT_D3M_ADDRESS)]
    pub d3m_address: Address,

    /// Helper contract exposing shouldExec(address,uint256)
    #[arg(long, env = "HELPER_ADDRESS", default_value = DEFAULT_HELPER_ADDRESS)]
    pub helper_address: Address,

    /// Blocknative API key, sent as the Authorization header
    #[arg(long, env = "BLOCKNATIVE_API_KEY", hide_env_values = true)]
    pub blocknative_api_key: String,

    #[arg(long, env = "BLOCKNATIVE_URL", default_value = DEFAULT_BLOCKNATIVE_URL)]
    pub blocknative_url: String,

    /// Blocknative confidence tier used for the initial tip
    #[arg(long, env = "ORACLE_CONFIDENCE", value_enum, default_value = "80")]
    pub confidence: ConfidenceTier,

    /// Threshold passed to shouldExec, in wei
    #[arg(long, env = "THRESHOLD_WEI", default_value = DEFAULT_THRESHOLD_WEI)]
    pub threshold_wei: U256,

    /// Seconds between tip increases while the transaction is unmined
    #[arg(long, env = "GAS_EVERY_SECS", default_value_t = DEFAULT_GAS_EVERY_SECS)]
    pub gas_every_secs: u64,

    /// Tip multiplier per step, e.g. 1.125
    #[arg(long, env = "GAS_GROWTH_RATIO", default_value = DEFAULT_GAS_GROWTH_RATIO)]
    pub gas_growth_ratio: GrowthRatio,

    /// Upper bound for the tip, in gwei
    #[arg(long, env = "MAX_PRIORITY_FEE_GWEI", default_value = DEFAULT_MAX_PRIORITY_FEE_GWEI)]
    pub max_priority_fee_gwei: String,

    /// Receipt polling interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,

    /// Stop waiting for inclusion after this many seconds
    #[arg(long, env = "TX_TIMEOUT_SECS", default_value_t = DEFAULT_TX_TIMEOUT_SECS)]
    pub tx_timeout_secs: u64,

    /// Supersede a transaction left pending by an earlier run instead of aborting
    #[arg(long, env = "REPLACE_PENDING")]
    pub replace_pending: bool,
}

/// Keeper configuration with every value validated
pub struct KeeperConfig {
    pub rpc_url: String,
    pub rpc_timeout: Duration,
    pub signing: SigningContext,
    pub d3m_address: Address,
    pub helper_address: Address,
    pub blocknative_api_key: String,
    pub blocknative_url: String,
    pub confidence: ConfidenceTier,
    pub threshold: U256,
    /// Seeded with the fallback tip; each run reseeds it from the oracle
    pub fee_schedule: GeometricGasPrice,
    pub submitter: SubmitterSettings,
}

impl KeeperConfig {
    /// Validates everything up front, no network access.
    pub fn load(args: CliArgs) -> Result<Self> {
        let rpc_url = args.rpc_url.trim().to_string();
        reqwest::Url::parse(&rpc_url).with_context(|| format!("Invalid RPC URL: {rpc_url}"))?;
        reqwest::Url::parse(&args.blocknative_url)
            .with_context(|| format!("Invalid Blocknative URL: {}", args.blocknative_url))?;

        let signer = load_signer(&args.private_key).context("Invalid private key")?;
        if signer.address() != args.eth_from {
            bail!(
                "ETH_FROM {} does not match the private key address {}",
                args.eth_from,
                signer.address()
            );
        }
        let signing = SigningContext::new(signer);

        let blocknative_api_key = args.blocknative_api_key.trim().to_string();
        ensure!(
            !blocknative_api_key.is_empty(),
            "Blocknative API key must not be empty"
        );

        ensure!(args.rpc_timeout_secs > 0, "RPC timeout must be positive");
        ensure!(args.poll_interval_secs > 0, "Poll interval must be positive");
        ensure!(args.tx_timeout_secs > 0, "Transaction timeout must be positive");

        let max_tip = parse_gwei(&args.max_priority_fee_gwei)
            .with_context(|| format!("Invalid max priority fee: {}", args.max_priority_fee_gwei))?;
        let fee_schedule = GeometricGasPrice::new(
            FALLBACK_PRIORITY_FEE_WEI,
            args.gas_growth_ratio,
            args.gas_every_secs,
            max_tip,
        )
        .context("Invalid fee escalation settings")?;

        let config = KeeperConfig {
            rpc_url,
            rpc_timeout: Duration::from_secs(args.rpc_timeout_secs),
            signing,
            d3m_address: args.d3m_address,
            helper_address: args.helper_address,
            blocknative_api_key,
            blocknative_url: args.blocknative_url,
            confidence: args.confidence,
            threshold: args.threshold_wei,
            fee_schedule,
            submitter: SubmitterSettings {
                poll_interval: Duration::from_secs(args.poll_interval_secs),
                timeout: Duration::from_secs(args.tx_timeout_secs),
                replace_pending: args.replace_pending,
            },
        };

        info!(
            rpc_url = %config.rpc_url,
            sender = %config.signing.address(),
            d3m = %config.d3m_address,
            helper = %config.helper_address,
            threshold = %config.threshold,
            confidence = %config.confidence,
            ratio = %config.fee_schedule.ratio(),
            every_secs = config.fee_schedule.every_secs(),
            max_tip = config.fee_schedule.max_tip(),
            "Loaded KeeperConfig"
        );

        Ok(config)
    }
}

fn parse_gwei(value: &str) -> Result<u128> {
    let value = value.trim();
    ensure!(!value.starts_with('-'), "must not be negative");
    let wei = parse_units(value, "gwei")?.get_absolute();
    u128::try_from(wei).context("value too large")
}
