use alloy::{
    consensus::TxEnvelope,
    network::{EthereumWallet, TransactionBuilder},
    primitives::Address,
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use anyhow::{Context, Result};

use crate::errors::SubmissionError;

/// Load a signer from a private key string (with or without 0x prefix)
pub fn load_signer(private_key: &str) -> Result<PrivateKeySigner> {
    let key = private_key.trim().trim_start_matches("0x");
    key.parse::<PrivateKeySigner>()
        .context("Failed to parse private key")
}

/// Key material and sender address handed explicitly to the submitter.
#[derive(Clone)]
pub struct SigningContext {
    wallet: EthereumWallet,
    address: Address,
}

impl SigningContext {
    pub fn new(signer: PrivateKeySigner) -> Self {
        let address = signer.address();
        Self {
            wallet: EthereumWallet::from(signer),
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub(crate) async fn sign(
        &self,
        request: TransactionRequest,
    ) -> Result<TxEnvelope, SubmissionError> {
        request
            .build(&self.wallet)
            .await
            .map_err(|e| SubmissionError::Signing(e.to_string()))
    }
}

impl std::fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningContext")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
