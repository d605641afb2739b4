//! One keeper run: check the predicate, price the call, submit it, report.

use crate::clients::KeeperChain;
use crate::contracts::D3MHub;
use crate::errors::FailureReason;
use crate::gas::{GasOracleClient, GeometricGasPrice};
use crate::predicate::PredicateReader;
use crate::submitter::{ExecutionSubmitter, TransactionResult};
use alloy::{
    primitives::{Address, B256, U256},
    sol_types::SolCall,
};
use std::fmt;
use tracing::{error, info};

/// The only externally observable result of a run
#[derive(Debug)]
pub enum ExecutionOutcome {
    Skipped,
    Succeeded { tx_hash: B256 },
    Failed(FailureReason),
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed(_))
    }

    /// The run's single terminal log line
    pub fn log(&self, target: Address) {
        match self {
            ExecutionOutcome::Skipped => info!(%target, "Not ready to exec yet"),
            ExecutionOutcome::Succeeded { tx_hash } => {
                info!(%target, tx_hash = ?tx_hash, "Exec on D3M done")
            }
            ExecutionOutcome::Failed(reason) => {
                error!(%target, error = %reason, "Failed to run exec on D3M")
            }
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Skipped => write!(f, "Skipped"),
            ExecutionOutcome::Succeeded { .. } => write!(f, "Succeeded"),
            ExecutionOutcome::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

pub struct Controller<C> {
    predicate: PredicateReader<C>,
    oracle: GasOracleClient,
    submitter: ExecutionSubmitter<C>,
    target: Address,
    threshold: U256,
    /// Escalation parameters; the initial tip is replaced by the oracle's estimate
    fee_schedule: GeometricGasPrice,
}

impl<C: KeeperChain> Controller<C> {
    pub fn new(
        predicate: PredicateReader<C>,
        oracle: GasOracleClient,
        submitter: ExecutionSubmitter<C>,
        target: Address,
        threshold: U256,
        fee_schedule: GeometricGasPrice,
    ) -> Self {
        Self {
            predicate,
            oracle,
            submitter,
            target,
            threshold,
            fee_schedule,
        }
    }

    /// Never errors; every failure ends up in [`ExecutionOutcome::Failed`].
    pub async fn run(&self) -> ExecutionOutcome {
        let outcome = self.execute().await;
        outcome.log(self.target);
        outcome
    }

    async fn execute(&self) -> ExecutionOutcome {
        let ready = match self
            .predicate
            .should_execute(self.target, self.threshold)
            .await
        {
            Ok(ready) => ready,
            Err(e) => return ExecutionOutcome::Failed(e.into()),
        };
        if !ready {
            return ExecutionOutcome::Skipped;
        }

        let estimate = self.oracle.fetch_initial_priority_fee().await;
        let policy = self.fee_schedule.with_initial_tip(estimate.priority_fee());
        info!(
            target = %self.target,
            sender = %self.submitter.sender(),
            tip = policy.initial_tip(),
            source = %estimate.source(),
            "Executing D3M"
        );

        let calldata = D3MHub::execCall {}.abi_encode().into();
        match self.submitter.submit(self.target, calldata, &policy).await {
            Ok(TransactionResult::Succeeded(mined)) => ExecutionOutcome::Succeeded {
                tx_hash: mined.tx_hash(),
            },
            Ok(TransactionResult::Reverted(mined)) => {
                ExecutionOutcome::Failed(FailureReason::OnChainRevert {
                    tx_hash: mined.tx_hash(),
                    gas_used: mined.gas_used(),
                })
            }
            Err(e) => ExecutionOutcome::Failed(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::consts::{DEFAULT_THRESHOLD_WEI, FALLBACK_PRIORITY_FEE_WEI, GWEI};
    use crate::errors::SubmissionError;
    use crate::gas::{ConfidenceTier, GrowthRatio};
    use crate::submitter::SubmitterSettings;
    use crate::test_utils::{MockChain, TEST_D3M, TEST_HELPER, test_signing_context};
    use alloy::primitives::Bytes;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const API_KEY: &str = "test-key";

    fn oracle_body(tip: f64) -> serde_json::Value {
        let estimated: Vec<_> = [99, 95, 90, 80, 70]
            .iter()
            .map(|confidence| json!({ "confidence": confidence, "maxPriorityFeePerGas": tip }))
            .collect();
        json!({ "blockPrices": [ { "estimatedPrices": estimated } ] })
    }

    fn controller(
        chain: &Arc<MockChain>,
        server: &MockServer,
        every_secs: u64,
    ) -> Controller<MockChain> {
        let oracle = GasOracleClient::new(
            &server.base_url(),
            API_KEY.to_string(),
            ConfidenceTier::P80,
            Duration::from_secs(2),
        )
        .unwrap();
        let submitter = ExecutionSubmitter::new(
            chain.clone(),
            test_signing_context(),
            SubmitterSettings {
                poll_interval: Duration::from_millis(10),
                timeout: Duration::from_secs(10),
                replace_pending: false,
            },
        );
        let fee_schedule =
            GeometricGasPrice::new(GWEI, GrowthRatio::default(), every_secs, 100 * GWEI).unwrap();
        Controller::new(
            PredicateReader::new(chain.clone(), TEST_HELPER),
            oracle,
            submitter,
            TEST_D3M,
            DEFAULT_THRESHOLD_WEI.parse().unwrap(),
            fee_schedule,
        )
    }

    #[tokio::test]
    async fn test_predicate_false_skips_without_oracle_or_submission() {
        let server = MockServer::start_async().await;
        let oracle = server
            .mock_async(|when, then| {
                when.method(GET).path("/gasprices/blockprices");
                then.status(200).json_body(oracle_body(12.0));
            })
            .await;
        let chain = Arc::new(MockChain::new().with_predicate(Ok(false)));

        let outcome = controller(&chain, &server, 180).run().await;

        assert!(matches!(outcome, ExecutionOutcome::Skipped));
        assert_eq!(outcome.to_string(), "Skipped");
        assert_eq!(oracle.hits_async().await, 0);
        assert_eq!(chain.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_predicate_error_fails_without_submission() {
        let server = MockServer::start_async().await;
        let oracle = server
            .mock_async(|when, then| {
                when.method(GET).path("/gasprices/blockprices");
                then.status(200).json_body(oracle_body(12.0));
            })
            .await;
        let chain = Arc::new(MockChain::new().with_predicate(Err("header not found")));

        let outcome = controller(&chain, &server, 180).run().await;

        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed(FailureReason::PredicateRead(_))
        ));
        assert!(outcome.is_failure());
        assert!(outcome.to_string().starts_with("Failed: "));
        assert_eq!(oracle.hits_async().await, 0);
        assert_eq!(chain.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_oracle_tip_mined_first_try_succeeds() {
        let server = MockServer::start_async().await;
        let oracle = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/gasprices/blockprices")
                    .header("authorization", API_KEY);
                then.status(200).json_body(oracle_body(12.0));
            })
            .await;
        let chain = Arc::new(MockChain::new().mining(0, true));

        let outcome = controller(&chain, &server, 180).run().await;

        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tip, 12_000_000_000);
        assert_eq!(sent[0].input, Bytes::from(D3MHub::execCall {}.abi_encode()));
        assert!(matches!(
            outcome,
            ExecutionOutcome::Succeeded { tx_hash } if tx_hash == sent[0].hash
        ));
        assert_eq!(outcome.to_string(), "Succeeded");
        oracle.assert_async().await;
    }

    #[tokio::test]
    async fn test_oracle_failure_falls_back_and_escalates() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gasprices/blockprices");
                then.status(503);
            })
            .await;
        // Not mined within the first interval; the replacement is
        let chain = Arc::new(MockChain::new().mining(1, true));

        let outcome = controller(&chain, &server, 1).run().await;

        let sent = chain.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].tip, FALLBACK_PRIORITY_FEE_WEI);
        assert_eq!(sent[1].tip, 1_687_500_000);
        assert_eq!(sent[0].nonce, sent[1].nonce);
        assert!(matches!(outcome, ExecutionOutcome::Succeeded { .. }));
    }

    #[tokio::test]
    async fn test_on_chain_revert_is_distinct_from_pre_submission_abort() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gasprices/blockprices");
                then.status(200).json_body(oracle_body(2.0));
            })
            .await;

        let reverted_chain = Arc::new(MockChain::new().mining(0, false));
        let reverted = controller(&reverted_chain, &server, 180).run().await;
        assert!(matches!(
            reverted,
            ExecutionOutcome::Failed(FailureReason::OnChainRevert { gas_used: 85_000, .. })
        ));
        assert_eq!(reverted_chain.send_calls(), 1);

        let aborted_chain =
            Arc::new(MockChain::new().failing_gas_estimate("execution reverted"));
        let aborted = controller(&aborted_chain, &server, 180).run().await;
        assert!(matches!(
            aborted,
            ExecutionOutcome::Failed(FailureReason::Submission(SubmissionError::WouldRevert(_)))
        ));
        assert_eq!(aborted_chain.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_oracle_tip_is_clamped_to_cap() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gasprices/blockprices");
                then.status(200).json_body(oracle_body(500.0));
            })
            .await;
        let chain = Arc::new(MockChain::new().mining(0, true));

        let outcome = controller(&chain, &server, 180).run().await;

        assert!(matches!(outcome, ExecutionOutcome::Succeeded { .. }));
        assert_eq!(chain.sent()[0].tip, 100 * GWEI);
    }
}
