//! Scripted in-memory node for unit tests.

use crate::clients::{KeeperChain, NonceTag, ReceiptSummary};
use crate::contracts::D3MHelper;
use crate::wallet::{SigningContext, load_signer};
use alloy::{
    consensus::{Transaction, TxEnvelope, transaction::SignerRecoverable},
    eips::eip2718::Decodable2718,
    primitives::{Address, B256, Bytes, U256, address},
    sol_types::{SolCall, SolValue},
};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Anvil account #0
pub(crate) const TEST_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub(crate) const TEST_SENDER: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
pub(crate) const TEST_HELPER: Address = address!("0xf06386F557Be828EE71bfaEA5BDadeB70EF57D69");
pub(crate) const TEST_D3M: Address = address!("0xa13C0c8eB109F5A13c6c90FC26AFb23bEB3Fb04a");
pub(crate) const TEST_BASE_FEE: u128 = 20_000_000_000;
pub(crate) const TEST_GAS_ESTIMATE: u64 = 200_000;

pub(crate) fn test_signing_context() -> SigningContext {
    SigningContext::new(load_signer(TEST_PRIVATE_KEY).unwrap())
}

/// A transaction the mock accepted
#[derive(Debug, Clone)]
pub(crate) struct SentTransaction {
    pub hash: B256,
    pub from: Address,
    pub nonce: u64,
    pub to: Option<Address>,
    pub input: Bytes,
    pub gas_limit: u64,
    pub tip: u128,
    pub max_fee: u128,
}

struct MockState {
    should_exec: Result<bool, String>,
    predicate_calls: Vec<(Address, U256)>,
    gas_estimate: Result<u64, String>,
    latest_nonce: u64,
    pending_nonce: u64,
    /// Latest nonce reported once the first transaction was accepted
    latest_nonce_after_send: Option<u64>,
    /// Rejections by send call index, counting rejected calls too
    send_failures: HashMap<usize, String>,
    send_calls: usize,
    sent: Vec<SentTransaction>,
    /// Accepted transaction index that gets mined, and its status
    mined: Option<(usize, bool)>,
    /// Receipts stay hidden until this many transactions were accepted
    receipt_after_sends: usize,
    receipt_error: Option<String>,
}

pub(crate) struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                should_exec: Ok(true),
                predicate_calls: Vec::new(),
                gas_estimate: Ok(TEST_GAS_ESTIMATE),
                latest_nonce: 7,
                pending_nonce: 7,
                latest_nonce_after_send: None,
                send_failures: HashMap::new(),
                send_calls: 0,
                sent: Vec::new(),
                mined: None,
                receipt_after_sends: 0,
                receipt_error: None,
            }),
        }
    }

    pub(crate) fn with_predicate(self, result: Result<bool, &str>) -> Self {
        self.state.lock().unwrap().should_exec = result.map_err(str::to_string);
        self
    }

    pub(crate) fn with_nonces(self, latest: u64, pending: u64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.latest_nonce = latest;
            state.pending_nonce = pending;
        }
        self
    }

    pub(crate) fn with_foreign_nonce_bump(self, latest: u64) -> Self {
        self.state.lock().unwrap().latest_nonce_after_send = Some(latest);
        self
    }

    pub(crate) fn failing_gas_estimate(self, message: &str) -> Self {
        self.state.lock().unwrap().gas_estimate = Err(message.to_string());
        self
    }

    pub(crate) fn failing_send(self, call_index: usize, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .send_failures
            .insert(call_index, message.to_string());
        self
    }

    pub(crate) fn mining(self, accepted_index: usize, success: bool) -> Self {
        self.state.lock().unwrap().mined = Some((accepted_index, success));
        self
    }

    pub(crate) fn with_receipt_delay(self, accepted_sends: usize) -> Self {
        self.state.lock().unwrap().receipt_after_sends = accepted_sends;
        self
    }

    pub(crate) fn failing_receipts(self, message: &str) -> Self {
        self.state.lock().unwrap().receipt_error = Some(message.to_string());
        self
    }

    pub(crate) fn sent(&self) -> Vec<SentTransaction> {
        self.state.lock().unwrap().sent.clone()
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.state.lock().unwrap().send_calls
    }

    pub(crate) fn predicate_calls(&self) -> Vec<(Address, U256)> {
        self.state.lock().unwrap().predicate_calls.clone()
    }
}

#[async_trait]
impl KeeperChain for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(1)
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes> {
        if to != TEST_HELPER {
            bail!("unexpected call to {to}");
        }
        let decoded = D3MHelper::shouldExecCall::abi_decode(&input)?;
        let mut state = self.state.lock().unwrap();
        state
            .predicate_calls
            .push((decoded._direct, decoded._threshold));
        match &state.should_exec {
            Ok(value) => Ok(Bytes::from(value.abi_encode())),
            Err(message) => Err(anyhow!(message.clone())),
        }
    }

    async fn estimate_gas(&self, _from: Address, _to: Address, _input: Bytes) -> Result<u64> {
        self.state
            .lock()
            .unwrap()
            .gas_estimate
            .clone()
            .map_err(|message| anyhow!(message))
    }

    async fn base_fee(&self) -> Result<u128> {
        Ok(TEST_BASE_FEE)
    }

    async fn nonce(&self, _account: Address, tag: NonceTag) -> Result<u64> {
        let state = self.state.lock().unwrap();
        let latest = match (state.sent.is_empty(), state.latest_nonce_after_send) {
            (false, Some(bumped)) => bumped,
            _ => state.latest_nonce,
        };
        Ok(match tag {
            NonceTag::Latest => latest,
            NonceTag::Pending => state.pending_nonce.max(latest),
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        let mut state = self.state.lock().unwrap();
        let call_index = state.send_calls;
        state.send_calls += 1;
        if let Some(message) = state.send_failures.get(&call_index) {
            bail!("server returned an error response: {message}");
        }

        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())?;
        let sent = SentTransaction {
            hash: *envelope.tx_hash(),
            from: envelope.recover_signer()?,
            nonce: envelope.nonce(),
            to: envelope.to(),
            input: envelope.input().clone(),
            gas_limit: envelope.gas_limit(),
            tip: envelope.max_priority_fee_per_gas().unwrap_or_default(),
            max_fee: envelope.max_fee_per_gas(),
        };
        let hash = sent.hash;
        state.sent.push(sent);
        Ok(hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptSummary>> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.receipt_error {
            bail!("{message}");
        }
        let Some((index, success)) = state.mined else {
            return Ok(None);
        };
        if state.sent.len() < state.receipt_after_sends {
            return Ok(None);
        }
        match state.sent.get(index) {
            Some(sent) if sent.hash == tx_hash => Ok(Some(ReceiptSummary {
                tx_hash,
                success,
                block_number: Some(19_000_000),
                gas_used: 85_000,
                effective_gas_price: TEST_BASE_FEE + sent.tip,
            })),
            _ => Ok(None),
        }
    }
}
