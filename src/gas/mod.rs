pub mod escalation;
pub mod oracle;

pub use escalation::{EscalationError, GeometricGasPrice, GrowthRatio};
pub use oracle::{ConfidenceTier, GasOracleClient, OracleUnavailable};

use crate::config::consts::{FALLBACK_PRIORITY_FEE_WEI, MIN_PRIORITY_FEE_WEI};
use std::fmt;

/// Where an initial priority fee came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSource {
    Oracle,
    Fallback,
}

impl fmt::Display for FeeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeSource::Oracle => write!(f, "oracle"),
            FeeSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Initial priority fee for one run. Never below `MIN_PRIORITY_FEE_WEI`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimate {
    priority_fee: u128,
    source: FeeSource,
}

impl GasEstimate {
    pub fn from_oracle(priority_fee: u128) -> Self {
        Self {
            priority_fee: priority_fee.max(MIN_PRIORITY_FEE_WEI),
            source: FeeSource::Oracle,
        }
    }

    pub fn fallback() -> Self {
        Self {
            priority_fee: FALLBACK_PRIORITY_FEE_WEI,
            source: FeeSource::Fallback,
        }
    }

    pub fn priority_fee(&self) -> u128 {
        self.priority_fee
    }

    pub fn source(&self) -> FeeSource {
        self.source
    }
}
