//! Centralized defaults for the keeper CLI and the execution controller.

use std::time::Duration;

// =============================================================================
// Contracts
// =============================================================================

/// Mainnet D3M (Direct Deposit Module) hub
pub const DEFAULT_D3M_ADDRESS: &str = "0xa13C0c8eB109F5A13c6c90FC26AFb23bEB3Fb04a";

/// Mainnet helper exposing `shouldExec(address,uint256)`
pub const DEFAULT_HELPER_ADDRESS: &str = "0xf06386F557Be828EE71bfaEA5BDadeB70EF57D69";

/// Minimum actionable imbalance passed to the helper: 5M DAI in wad
pub const DEFAULT_THRESHOLD_WEI: &str = "5000000000000000000000000";

// =============================================================================
// Node
// =============================================================================

pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

/// Receipt polling cadence while a transaction is pending
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Give up waiting for inclusion after this long; the transaction stays in the mempool
pub const DEFAULT_TX_TIMEOUT_SECS: u64 = 3600;

/// Gas estimate buffer, in percent of the estimate
pub const GAS_LIMIT_BUFFER_PERCENT: u64 = 50;

/// Below this the keeper warns that it may not afford a replacement: 0.01 ETH
pub const MIN_ETH_BALANCE_WEI: u128 = 10_000_000_000_000_000;

// =============================================================================
// Gas oracle
// =============================================================================

pub const GWEI: u128 = 1_000_000_000;

pub const DEFAULT_BLOCKNATIVE_URL: &str = "https://api.blocknative.com";

pub const BLOCK_PRICES_PATH: &str = "/gasprices/blockprices";

pub const ORACLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Tip used whenever the oracle cannot be read: 1.5 gwei
pub const FALLBACK_PRIORITY_FEE_WEI: u128 = 3 * GWEI / 2;

/// Floor for any tip handed to the escalation policy: 0.1 gwei
pub const MIN_PRIORITY_FEE_WEI: u128 = GWEI / 10;

// =============================================================================
// Fee escalation
// =============================================================================

pub const DEFAULT_GAS_EVERY_SECS: u64 = 180;

/// 12.5% per step, the minimum bump most clients accept for a replacement
pub const DEFAULT_GAS_GROWTH_RATIO: &str = "1.125";

pub const DEFAULT_MAX_PRIORITY_FEE_GWEI: &str = "100";
