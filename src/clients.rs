//! Node collaborator used by the predicate reader and the submitter.
//!
//! [`KeeperChain`] is the narrow surface the keeper needs from a node; any
//! error it returns is treated by callers as an immediate failure.

use alloy::{
    eips::BlockNumberOrTag,
    network::TransactionBuilder,
    primitives::{Address, B256, Bytes, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::{client::RpcClient, types::TransactionRequest},
    transports::http::Http,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceTag {
    Latest,
    Pending,
}

/// The parts of a receipt the keeper acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

#[async_trait]
pub trait KeeperChain: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Read-only `eth_call` against `to`
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes>;

    async fn estimate_gas(&self, from: Address, to: Address, input: Bytes) -> Result<u64>;

    /// Base fee of the latest block
    async fn base_fee(&self) -> Result<u128>;

    async fn nonce(&self, account: Address, tag: NonceTag) -> Result<u64>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256>;

    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptSummary>>;
}

/// HTTP JSON-RPC client with a per-request timeout
#[derive(Clone)]
pub struct AlloyChainClient {
    provider: DynProvider,
}

impl AlloyChainClient {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {rpc_url}"))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build RPC HTTP client")?;
        let transport = Http::with_client(http, url);
        let is_local = transport.guess_local();
        let client = RpcClient::new(transport, is_local);
        let provider = ProviderBuilder::new().connect_client(client).erased();
        Ok(Self { provider })
    }

    pub async fn get_balance(&self, account: Address) -> Result<U256> {
        Ok(self.provider.get_balance(account).await?)
    }
}

#[async_trait]
impl KeeperChain for AlloyChainClient {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes> {
        let request = TransactionRequest::default()
            .with_to(to)
            .with_input(input);
        Ok(self.provider.call(request).await?)
    }

    async fn estimate_gas(&self, from: Address, to: Address, input: Bytes) -> Result<u64> {
        let request = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(input);
        Ok(self.provider.estimate_gas(request).await?)
    }

    async fn base_fee(&self) -> Result<u128> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .context("Missing latest block")?;
        let base_fee = block
            .header
            .base_fee_per_gas
            .context("Latest block has no base fee")?;
        Ok(u128::from(base_fee))
    }

    async fn nonce(&self, account: Address, tag: NonceTag) -> Result<u64> {
        let request = self.provider.get_transaction_count(account);
        let nonce = match tag {
            NonceTag::Latest => request.latest().await?,
            NonceTag::Pending => request.pending().await?,
        };
        Ok(nonce)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        let pending = self.provider.send_raw_transaction(&raw).await?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptSummary>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(|receipt| ReceiptSummary {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_rpc_url_fails_fast() {
        assert!(AlloyChainClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_valid_rpc_url_builds_without_network() {
        assert!(AlloyChainClient::new("http://127.0.0.1:8545", Duration::from_secs(1)).is_ok());
    }
}
