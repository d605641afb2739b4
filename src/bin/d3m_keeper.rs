use alloy::primitives::{U256, utils::format_ether};
use anyhow::{Context, Result};
use clap::Parser;
use d3m_keeper::{
    Controller, ExecutionOutcome, FailureReason,
    clients::AlloyChainClient,
    config::{CliArgs, KeeperConfig, consts::MIN_ETH_BALANCE_WEI, consts::ORACLE_TIMEOUT},
    gas::GasOracleClient,
    predicate::PredicateReader,
    shutdown::shutdown_signal,
    submitter::ExecutionSubmitter,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli_args = CliArgs::parse();
    let config = KeeperConfig::load(cli_args)?;

    let chain = Arc::new(
        AlloyChainClient::new(&config.rpc_url, config.rpc_timeout)
            .context("Failed to create RPC client")?,
    );
    let oracle = GasOracleClient::new(
        &config.blocknative_url,
        config.blocknative_api_key.clone(),
        config.confidence,
        ORACLE_TIMEOUT,
    )
    .context("Failed to create gas oracle client")?;

    let sender = config.signing.address();
    match chain.get_balance(sender).await {
        Ok(balance) if balance < U256::from(MIN_ETH_BALANCE_WEI) => warn!(
            %sender,
            balance = %format_ether(balance),
            minimum = %format_ether(U256::from(MIN_ETH_BALANCE_WEI)),
            "Keeper wallet balance is low"
        ),
        Ok(balance) => info!(%sender, balance = %format_ether(balance), "Keeper wallet ready"),
        Err(e) => warn!(%sender, error = %e, "Failed to read keeper wallet balance"),
    }

    let target = config.d3m_address;
    let controller = Controller::new(
        PredicateReader::new(chain.clone(), config.helper_address),
        oracle,
        ExecutionSubmitter::new(chain, config.signing, config.submitter),
        target,
        config.threshold,
        config.fee_schedule,
    );

    let outcome = tokio::select! {
        outcome = controller.run() => outcome,
        _ = shutdown_signal() => {
            let outcome = ExecutionOutcome::Failed(FailureReason::Interrupted);
            outcome.log(target);
            outcome
        }
    };

    Ok(if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
