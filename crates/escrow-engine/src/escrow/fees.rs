use serde::{Deserialize, Serialize};

const BASIS_POINTS: i128 = 10_000;
const DEFAULT_RATE_BPS: u32 = 1_000;

/// Platform fee schedule: a flat percentage in basis points with optional clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    rate_bps: u32,
    minimum_fee: Option<i64>,
    maximum_fee: Option<i64>,
}

impl FeeSchedule {
    pub fn percentage(rate_bps: u32) -> Result<Self, FeeError> {
        if i128::from(rate_bps) > BASIS_POINTS {
            return Err(FeeError::RateOutOfRange(rate_bps));
        }

        Ok(Self {
            rate_bps,
            minimum_fee: None,
            maximum_fee: None,
        })
    }

    pub fn with_bounds(
        mut self,
        minimum_fee: Option<i64>,
        maximum_fee: Option<i64>,
    ) -> Result<Self, FeeError> {
        if let Some(min) = minimum_fee {
            if min < 0 {
                return Err(FeeError::NegativeBound(min));
            }
        }
        if let Some(max) = maximum_fee {
            if max < 0 {
                return Err(FeeError::NegativeBound(max));
            }
        }
        if let (Some(min), Some(max)) = (minimum_fee, maximum_fee) {
            if min > max {
                return Err(FeeError::InvertedBounds { min, max });
            }
        }

        self.minimum_fee = minimum_fee;
        self.maximum_fee = maximum_fee;
        Ok(self)
    }

    pub fn rate_bps(&self) -> u32 {
        self.rate_bps
    }

    pub fn minimum_fee(&self) -> Option<i64> {
        self.minimum_fee
    }

    pub fn maximum_fee(&self) -> Option<i64> {
        self.maximum_fee
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            rate_bps: DEFAULT_RATE_BPS,
            minimum_fee: None,
            maximum_fee: None,
        }
    }
}

/// Result of applying a schedule to a gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub gross: i64,
    pub fee: i64,
    pub net: i64,
}

/// Compute the platform fee and agent payout for a gross amount in minor units.
///
/// The percentage is truncated toward zero, then clamped to the schedule bounds and
/// to the gross amount itself so the net payout is never negative.
pub fn compute_fee(gross: i64, schedule: &FeeSchedule) -> Result<FeeBreakdown, FeeError> {
    if gross <= 0 {
        return Err(FeeError::NonPositiveAmount(gross));
    }

    let raw = i128::from(gross) * i128::from(schedule.rate_bps) / BASIS_POINTS;
    // rate <= 100%, so raw <= gross and fits in i64
    let mut fee = raw as i64;

    if let Some(min) = schedule.minimum_fee {
        fee = fee.max(min);
    }
    if let Some(max) = schedule.maximum_fee {
        fee = fee.min(max);
    }
    let fee = fee.min(gross);

    Ok(FeeBreakdown {
        gross,
        fee,
        net: gross - fee,
    })
}

/// Render minor units as `1234.56 CAD`; an empty currency leaves the bare figure.
pub fn format_money(amount: i64, currency: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let amount = amount.unsigned_abs();
    let figure = format!("{sign}{}.{:02}", amount / 100, amount % 100);
    if currency.is_empty() {
        figure
    } else {
        format!("{figure} {currency}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeeError {
    #[error("gross amount must be positive (found {0})")]
    NonPositiveAmount(i64),
    #[error("fee rate {0} bps exceeds 10000 bps")]
    RateOutOfRange(u32),
    #[error("fee bounds must not be negative (found {0})")]
    NegativeBound(i64),
    #[error("minimum fee {min} exceeds maximum fee {max}")]
    InvertedBounds { min: i64, max: i64 },
}
