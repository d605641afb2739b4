//! Builds, signs and broadcasts a single call, then tracks it until a receipt
//! shows up, replacing it by fee while it stays unmined.
//!
//! Every replacement reuses the nonce of the first attempt, so at most one of
//! the broadcast transactions can ever be included.

use crate::clients::{KeeperChain, NonceTag, ReceiptSummary};
use crate::config::consts::GAS_LIMIT_BUFFER_PERCENT;
use crate::errors::{RpcErrorKind, SubmissionError};
use crate::gas::GeometricGasPrice;
use crate::wallet::SigningContext;
use alloy::{
    eips::eip2718::Encodable2718,
    network::TransactionBuilder,
    primitives::{Address, B256, Bytes},
    rpc::types::TransactionRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Polls in a row that may see the account nonce move past ours without a
/// receipt before the nonce is considered taken by someone else.
const NONCE_CONSUMED_GRACE_POLLS: u32 = 3;

#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Supersede a transaction left pending by an earlier run instead of aborting
    pub replace_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Pending,
    Mined,
    Replaced,
    /// Rejected by the node, never in the mempool
    Failed,
}

#[derive(Debug, Clone)]
pub struct TransactionAttempt {
    pub nonce: u64,
    pub tip: u128,
    pub max_fee: u128,
    pub tx_hash: B256,
    pub submitted_at: Instant,
    pub status: AttemptStatus,
}

/// A broadcast transaction that made it into a block
#[derive(Debug, Clone)]
pub struct MinedTransaction {
    pub receipt: ReceiptSummary,
    pub attempts: Vec<TransactionAttempt>,
}

impl MinedTransaction {
    pub fn tx_hash(&self) -> B256 {
        self.receipt.tx_hash
    }

    pub fn gas_used(&self) -> u64 {
        self.receipt.gas_used
    }
}

#[derive(Debug, Clone)]
pub enum TransactionResult {
    Succeeded(MinedTransaction),
    /// Mined with a failed status; the gas is spent
    Reverted(MinedTransaction),
}

struct PreparedCall {
    target: Address,
    input: Bytes,
    nonce: u64,
    gas_limit: u64,
    estimated_gas: u64,
    chain_id: u64,
    /// The nonce already carries a transaction from an earlier run
    replacing_foreign: bool,
}

pub struct ExecutionSubmitter<C> {
    chain: Arc<C>,
    signer: SigningContext,
    settings: SubmitterSettings,
}

impl<C: KeeperChain> ExecutionSubmitter<C> {
    pub fn new(chain: Arc<C>, signer: SigningContext, settings: SubmitterSettings) -> Self {
        Self {
            chain,
            signer,
            settings,
        }
    }

    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    pub async fn submit(
        &self,
        target: Address,
        calldata: Bytes,
        policy: &GeometricGasPrice,
    ) -> Result<TransactionResult, SubmissionError> {
        let call = self.prepare(target, calldata).await?;
        info!(
            %target,
            nonce = call.nonce,
            gas_limit = call.gas_limit,
            initial_tip = policy.initial_tip(),
            max_tip = policy.max_tip(),
            every_secs = policy.every_secs(),
            "Submitting transaction"
        );

        let started = Instant::now();
        let mut attempts: Vec<TransactionAttempt> = Vec::new();
        let mut last_rejected_tip: Option<u128> = None;
        let mut foreign_nonce_polls = 0u32;

        loop {
            let elapsed = started.elapsed();
            let tip = policy.price_at(elapsed.as_secs());
            let current = attempts
                .iter()
                .rposition(|attempt| attempt.status == AttemptStatus::Pending);
            let escalate = match current {
                Some(index) => tip > attempts[index].tip,
                // Nothing accepted yet
                None => true,
            };

            if escalate && last_rejected_tip != Some(tip) {
                let max_fee = self
                    .max_fee(tip, current.map(|index| &attempts[index]), policy)
                    .await?;
                let replacing = current.is_some() || call.replacing_foreign;
                let (attempt, sent) = self.broadcast(&call, tip, max_fee).await?;

                match sent {
                    Ok(()) => {
                        if let Some(index) = current {
                            attempts[index].status = AttemptStatus::Replaced;
                            info!(
                                tx_hash = ?attempt.tx_hash,
                                replaced = ?attempts[index].tx_hash,
                                nonce = attempt.nonce,
                                tip,
                                max_fee,
                                elapsed_secs = elapsed.as_secs(),
                                "Replaced transaction with higher fee"
                            );
                        } else {
                            info!(
                                tx_hash = ?attempt.tx_hash,
                                nonce = attempt.nonce,
                                tip,
                                max_fee,
                                "Transaction sent"
                            );
                        }
                        attempts.push(attempt);
                    }
                    Err(SubmissionError::Broadcast { kind, message })
                        if replacing && tolerated_on_replacement(kind) =>
                    {
                        if kind == RpcErrorKind::NonceTooLow {
                            info!(
                                nonce = call.nonce,
                                tip,
                                "Nonce already used; an earlier attempt may have been mined"
                            );
                        } else {
                            warn!(
                                nonce = call.nonce,
                                tip,
                                error = %message,
                                "Replacement rejected, previous transaction stays pending"
                            );
                        }
                        attempts.push(TransactionAttempt {
                            status: AttemptStatus::Failed,
                            ..attempt
                        });
                        last_rejected_tip = Some(tip);
                    }
                    Err(e) => return Err(e),
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;

            if let Some(receipt) = self.find_receipt(&attempts).await? {
                return Ok(self.finish(receipt, attempts, &call));
            }

            let elapsed = started.elapsed();
            if elapsed >= self.settings.timeout {
                let last_tx = attempts
                    .iter()
                    .rev()
                    .find(|attempt| attempt.status == AttemptStatus::Pending)
                    .map(|attempt| attempt.tx_hash);
                return Err(SubmissionError::Timeout {
                    waited_secs: elapsed.as_secs(),
                    last_tx,
                });
            }

            let latest = self
                .chain
                .nonce(self.signer.address(), NonceTag::Latest)
                .await
                .map_err(SubmissionError::node("reading account nonce"))?;
            if latest > call.nonce {
                foreign_nonce_polls += 1;
                debug!(
                    nonce = call.nonce,
                    latest,
                    polls = foreign_nonce_polls,
                    "Account nonce moved without a known receipt"
                );
                if foreign_nonce_polls > NONCE_CONSUMED_GRACE_POLLS {
                    return Err(SubmissionError::NonceConsumed { nonce: call.nonce });
                }
            } else {
                foreign_nonce_polls = 0;
            }
        }
    }

    async fn prepare(&self, target: Address, input: Bytes) -> Result<PreparedCall, SubmissionError> {
        let sender = self.signer.address();
        let latest = self
            .chain
            .nonce(sender, NonceTag::Latest)
            .await
            .map_err(SubmissionError::node("reading latest nonce"))?;
        let pending = self
            .chain
            .nonce(sender, NonceTag::Pending)
            .await
            .map_err(SubmissionError::node("reading pending nonce"))?;

        let replacing_foreign = pending > latest;
        if replacing_foreign {
            if !self.settings.replace_pending {
                return Err(SubmissionError::PendingTransaction { latest, pending });
            }
            warn!(
                %sender,
                latest,
                pending,
                "Superseding transaction left pending by an earlier run"
            );
        }

        let estimated_gas = self
            .chain
            .estimate_gas(sender, target, input.clone())
            .await
            .map_err(|e| SubmissionError::WouldRevert(format!("{e:#}")))?;
        let gas_limit =
            estimated_gas.saturating_add(estimated_gas * GAS_LIMIT_BUFFER_PERCENT / 100);

        let chain_id = self
            .chain
            .chain_id()
            .await
            .map_err(SubmissionError::node("reading chain id"))?;

        Ok(PreparedCall {
            target,
            input,
            nonce: latest,
            gas_limit,
            estimated_gas,
            chain_id,
            replacing_foreign,
        })
    }

    /// `2 * base_fee + tip`, and never below the previous attempt's max fee
    /// scaled by the growth ratio.
    async fn max_fee(
        &self,
        tip: u128,
        previous: Option<&TransactionAttempt>,
        policy: &GeometricGasPrice,
    ) -> Result<u128, SubmissionError> {
        let base_fee = self
            .chain
            .base_fee()
            .await
            .map_err(SubmissionError::node("reading base fee"))?;
        let fresh = base_fee.saturating_mul(2).saturating_add(tip);
        Ok(match previous {
            Some(previous) => fresh.max(policy.ratio().scale_up(previous.max_fee)),
            None => fresh,
        })
    }

    /// Signing failures are returned directly; the node's answer is returned
    /// alongside the attempt so the caller can decide whether it is fatal.
    async fn broadcast(
        &self,
        call: &PreparedCall,
        tip: u128,
        max_fee: u128,
    ) -> Result<(TransactionAttempt, Result<(), SubmissionError>), SubmissionError> {
        let request = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(call.target)
            .with_input(call.input.clone())
            .with_nonce(call.nonce)
            .with_chain_id(call.chain_id)
            .with_gas_limit(call.gas_limit)
            .with_max_priority_fee_per_gas(tip)
            .with_max_fee_per_gas(max_fee);
        let envelope = self.signer.sign(request).await?;
        let local_hash = *envelope.tx_hash();

        let sent = self
            .chain
            .send_raw_transaction(envelope.encoded_2718().into())
            .await
            .map_err(SubmissionError::broadcast);

        let tx_hash = match &sent {
            Ok(tx_hash) => *tx_hash,
            Err(_) => local_hash,
        };
        let attempt = TransactionAttempt {
            nonce: call.nonce,
            tip,
            max_fee,
            tx_hash,
            submitted_at: Instant::now(),
            status: AttemptStatus::Pending,
        };
        Ok((attempt, sent.map(|_| ())))
    }

    /// Any accepted attempt may be the one that got mined, replaced or not.
    async fn find_receipt(
        &self,
        attempts: &[TransactionAttempt],
    ) -> Result<Option<ReceiptSummary>, SubmissionError> {
        for attempt in attempts
            .iter()
            .filter(|attempt| attempt.status != AttemptStatus::Failed)
        {
            let receipt = self
                .chain
                .receipt(attempt.tx_hash)
                .await
                .map_err(SubmissionError::node("fetching receipt"))?;
            if receipt.is_some() {
                return Ok(receipt);
            }
        }
        Ok(None)
    }

    fn finish(
        &self,
        receipt: ReceiptSummary,
        mut attempts: Vec<TransactionAttempt>,
        call: &PreparedCall,
    ) -> TransactionResult {
        let mut mined_tip = None;
        for attempt in attempts.iter_mut() {
            if attempt.tx_hash == receipt.tx_hash {
                attempt.status = AttemptStatus::Mined;
                mined_tip = Some((attempt.tip, attempt.max_fee));
            } else if attempt.status == AttemptStatus::Pending {
                attempt.status = AttemptStatus::Replaced;
            }
        }

        let total_cost = receipt
            .effective_gas_price
            .saturating_mul(u128::from(receipt.gas_used));
        info!(
            tx_hash = ?receipt.tx_hash,
            block_number = ?receipt.block_number,
            success = receipt.success,
            effective_gas_price = receipt.effective_gas_price,
            gas_used = receipt.gas_used,
            estimated_gas = call.estimated_gas,
            gas_limit = call.gas_limit,
            total_cost,
            tx_tip = ?mined_tip.map(|(tip, _)| tip),
            tx_max_fee = ?mined_tip.map(|(_, max_fee)| max_fee),
            broadcasts = attempts
                .iter()
                .filter(|attempt| attempt.status != AttemptStatus::Failed)
                .count(),
            "Transaction gas details"
        );

        let mined = MinedTransaction { receipt, attempts };
        if mined.receipt.success {
            TransactionResult::Succeeded(mined)
        } else {
            TransactionResult::Reverted(mined)
        }
    }
}

fn tolerated_on_replacement(kind: RpcErrorKind) -> bool {
    matches!(
        kind,
        RpcErrorKind::ReplacementUnderpriced | RpcErrorKind::AlreadyKnown | RpcErrorKind::NonceTooLow
    )
}
