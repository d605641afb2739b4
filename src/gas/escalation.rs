//! Geometric fee escalation for replace-by-fee resubmission.
//!
//! The tip grows by a fixed ratio for every full interval a transaction stays
//! unmined, up to a hard cap:
//!
//! ```text
//! price(t) = min(ceil(initial * ratio^floor(t / every)), cap)
//! ```
//!
//! The ratio is kept as a reduced fraction and prices are computed in integer
//! arithmetic. Long schedules with fine ratios fall back to a rescaled lower
//! bound instead of saturating at the cap.

use alloy::primitives::{U512, utils::parse_units};
use std::fmt;
use std::str::FromStr;

/// Ratios are accepted with at most this many decimal places.
const MAX_RATIO_DECIMALS: usize = 6;

/// Denominator size, in bits, past which `price_at` rescales its fraction.
const RESCALE_TRIGGER_BITS: usize = 320;
const RESCALED_DENOMINATOR_BITS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscalationError {
    #[error("invalid growth ratio '{0}': expected a decimal greater than 1 with at most 6 decimals")]
    InvalidRatio(String),
    #[error("escalation interval must be at least one second")]
    ZeroInterval,
    #[error("maximum priority fee must be positive")]
    ZeroCap,
}

/// Multiplier applied to the tip at every escalation step, as `numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthRatio {
    numerator: u64,
    denominator: u64,
}

impl GrowthRatio {
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, EscalationError> {
        if denominator == 0 || numerator <= denominator {
            return Err(EscalationError::InvalidRatio(format!(
                "{numerator}/{denominator}"
            )));
        }
        let divisor = gcd(numerator, denominator);
        Ok(Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        })
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// `ceil(value * ratio)`, saturating at `u128::MAX`.
    pub fn scale_up(&self, value: u128) -> u128 {
        let scaled = U512::from(value) * U512::from(self.numerator);
        let result = ceil_div(scaled, U512::from(self.denominator));
        u128::try_from(result).unwrap_or(u128::MAX)
    }
}

impl Default for GrowthRatio {
    fn default() -> Self {
        // 1.125
        Self {
            numerator: 9,
            denominator: 8,
        }
    }
}

impl FromStr for GrowthRatio {
    type Err = EscalationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || EscalationError::InvalidRatio(s.to_string());
        let decimals = s.split_once('.').map_or(0, |(_, frac)| frac.len());
        if s.starts_with('-') || decimals > MAX_RATIO_DECIMALS {
            return Err(invalid());
        }

        let scaled = parse_units(s, decimals as u8)
            .map_err(|_| invalid())?
            .get_absolute();
        let numerator = u64::try_from(scaled).map_err(|_| invalid())?;
        let denominator = 10u64.pow(decimals as u32);
        Self::new(numerator, denominator).map_err(|_| invalid())
    }
}

impl fmt::Display for GrowthRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Time-indexed tip schedule. Prices are derived on demand, never precomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometricGasPrice {
    initial_tip: u128,
    ratio: GrowthRatio,
    every_secs: u64,
    max_tip: u128,
}

impl GeometricGasPrice {
    /// An initial tip above `max_tip` is clamped to it.
    pub fn new(
        initial_tip: u128,
        ratio: GrowthRatio,
        every_secs: u64,
        max_tip: u128,
    ) -> Result<Self, EscalationError> {
        if every_secs == 0 {
            return Err(EscalationError::ZeroInterval);
        }
        if max_tip == 0 {
            return Err(EscalationError::ZeroCap);
        }
        Ok(Self {
            initial_tip: initial_tip.min(max_tip),
            ratio,
            every_secs,
            max_tip,
        })
    }

    /// Same schedule seeded with another initial tip, clamped to the cap.
    pub fn with_initial_tip(&self, initial_tip: u128) -> Self {
        Self {
            initial_tip: initial_tip.min(self.max_tip),
            ..self.clone()
        }
    }

    pub fn initial_tip(&self) -> u128 {
        self.initial_tip
    }

    pub fn max_tip(&self) -> u128 {
        self.max_tip
    }

    pub fn every_secs(&self) -> u64 {
        self.every_secs
    }

    pub fn ratio(&self) -> GrowthRatio {
        self.ratio
    }

    /// Tip to use once `elapsed_secs` have passed since the first broadcast.
    ///
    /// The fraction stays exact until its denominator exceeds
    /// `RESCALE_TRIGGER_BITS`. From then on both terms are shifted down and
    /// the denominator rounded up, so the tracked value is a lower bound that
    /// is never more than a rounding step away from the exact one.
    pub fn price_at(&self, elapsed_secs: u64) -> u128 {
        if self.initial_tip == 0 {
            return 0;
        }
        let steps = elapsed_secs / self.every_secs;
        let cap = U512::from(self.max_tip);
        let step_numerator = U512::from(self.ratio.numerator);
        let step_denominator = U512::from(self.ratio.denominator);

        // numerator < cap * denominator holds after every step, so with the
        // denominator kept below 2^RESCALE_TRIGGER_BITS neither product can
        // leave U512.
        let mut numerator = U512::from(self.initial_tip);
        let mut denominator = U512::from(1u8);
        let mut exact = true;
        for _ in 0..steps {
            if denominator.bit_len() > RESCALE_TRIGGER_BITS {
                let shift = denominator.bit_len() - RESCALED_DENOMINATOR_BITS;
                numerator >>= shift;
                denominator = (denominator >> shift) + U512::from(1u8);
                exact = false;
            }
            numerator *= step_numerator;
            denominator *= step_denominator;
            if numerator >= cap * denominator {
                return self.max_tip;
            }
        }

        // Once rescaled, the denominator exceeds any u128 tip, so the exact
        // value is not an integer and rounds up to floor + 1.
        let price = if exact {
            ceil_div(numerator, denominator)
        } else {
            numerator / denominator + U512::from(1u8)
        };
        u128::try_from(price)
            .unwrap_or(self.max_tip)
            .min(self.max_tip)
    }
}

fn ceil_div(numerator: U512, denominator: U512) -> U512 {
    let quotient = numerator / denominator;
    if quotient * denominator == numerator {
        quotient
    } else {
        quotient + U512::from(1u8)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
