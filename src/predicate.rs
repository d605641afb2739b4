use crate::clients::KeeperChain;
use crate::contracts::D3MHelper;
use crate::errors::PredicateReadError;
use alloy::{
    primitives::{Address, U256},
    sol_types::SolCall,
};
use anyhow::Context;
use std::sync::Arc;
use tracing::debug;

/// Asks the helper contract whether `exec()` on a D3M is due.
pub struct PredicateReader<C> {
    chain: Arc<C>,
    helper: Address,
}

impl<C: KeeperChain> PredicateReader<C> {
    pub fn new(chain: Arc<C>, helper: Address) -> Self {
        Self { chain, helper }
    }

    /// Single read, no retry. Errors never default to `true`.
    pub async fn should_execute(
        &self,
        target: Address,
        threshold: U256,
    ) -> Result<bool, PredicateReadError> {
        let input = D3MHelper::shouldExecCall {
            _direct: target,
            _threshold: threshold,
        }
        .abi_encode();

        let output = self
            .chain
            .call(self.helper, input.into())
            .await
            .with_context(|| format!("shouldExec call to {} failed", self.helper))
            .map_err(PredicateReadError)?;

        let ready = D3MHelper::shouldExecCall::abi_decode_returns(&output)
            .context("Failed to decode shouldExec result")
            .map_err(PredicateReadError)?;

        debug!(%target, %threshold, ready, "Read execution predicate");
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::consts::DEFAULT_THRESHOLD_WEI;
    use crate::test_utils::{MockChain, TEST_D3M, TEST_HELPER};

    fn threshold() -> U256 {
        DEFAULT_THRESHOLD_WEI.parse().unwrap()
    }

    #[tokio::test]
    async fn test_should_execute_true() {
        let chain = Arc::new(MockChain::new().with_predicate(Ok(true)));
        let reader = PredicateReader::new(chain.clone(), TEST_HELPER);

        assert!(reader.should_execute(TEST_D3M, threshold()).await.unwrap());
        assert_eq!(chain.predicate_calls(), vec![(TEST_D3M, threshold())]);
    }

    #[tokio::test]
    async fn test_should_execute_false() {
        let chain = Arc::new(MockChain::new().with_predicate(Ok(false)));
        let reader = PredicateReader::new(chain, TEST_HELPER);

        assert!(!reader.should_execute(TEST_D3M, threshold()).await.unwrap());
    }

    #[tokio::test]
    async fn test_node_error_is_not_retried() {
        let chain = Arc::new(MockChain::new().with_predicate(Err("connection refused")));
        let reader = PredicateReader::new(chain.clone(), TEST_HELPER);

        let err = reader.should_execute(TEST_D3M, threshold()).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(chain.predicate_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_helper_address_is_an_error() {
        let chain = Arc::new(MockChain::new());
        let reader = PredicateReader::new(chain.clone(), TEST_D3M);

        assert!(reader.should_execute(TEST_D3M, threshold()).await.is_err());
        assert!(chain.predicate_calls().is_empty());
    }
}
