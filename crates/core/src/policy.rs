use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalKind, Magnitude};
use crate::domain::roles::Tier;

/// Thresholds for one approval kind. A magnitude at or below the threshold
/// needs a Manager; anything above needs an Admin. The boundary itself
/// belongs to the lower tier — inclusive lower bound, by convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSchedule {
    pub percent_threshold: Decimal,
    pub amount_threshold: Decimal,
}

impl Default for TierSchedule {
    fn default() -> Self {
        Self {
            percent_threshold: Decimal::new(1500, 2), // 15%
            amount_threshold: Decimal::new(1_000_000, 2), // 10 000.00
        }
    }
}

impl TierSchedule {
    fn required_tier(&self, magnitude: &Magnitude) -> Tier {
        let (value, threshold) = match magnitude {
            Magnitude::Percent(v) => (*v, self.percent_threshold),
            Magnitude::Amount(v) => (*v, self.amount_threshold),
        };
        if value <= threshold {
            Tier::Manager
        } else {
            Tier::Admin
        }
    }
}

/// Pure mapping from an adjustment's size to the minimum approver tier.
/// Side-effect free so the engine can re-evaluate it identically at request
/// time and again at decision time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityPolicy {
    pub discount: TierSchedule,
    pub refund: TierSchedule,
    pub price_adjustment: TierSchedule,
}

impl AuthorityPolicy {
    pub fn uniform(schedule: TierSchedule) -> Self {
        Self { discount: schedule, refund: schedule, price_adjustment: schedule }
    }

    pub fn required_tier(&self, kind: ApprovalKind, magnitude: &Magnitude) -> Tier {
        self.schedule(kind).required_tier(magnitude)
    }

    fn schedule(&self, kind: ApprovalKind) -> &TierSchedule {
        match kind {
            ApprovalKind::Discount => &self.discount,
            ApprovalKind::Refund => &self.refund,
            ApprovalKind::PriceAdjustment => &self.price_adjustment,
        }
    }
}
