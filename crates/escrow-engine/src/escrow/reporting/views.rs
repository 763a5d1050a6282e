use serde::Serialize;

use crate::escrow::domain::EscrowStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCountEntry {
    pub status: EscrowStatus,
    pub status_label: &'static str,
    pub count: usize,
}

/// Dashboard totals, all amounts in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowSummary {
    pub transactions: usize,
    /// Gross held across funded, in-progress and completed escrows.
    pub in_escrow: i64,
    pub released_total: i64,
    pub net_paid_out: i64,
    pub refunded_total: i64,
    /// Platform fees earned on released escrows.
    pub fee_revenue: i64,
    /// Gross frozen in escrows awaiting an arbiter.
    pub disputed_total: i64,
    pub open_disputes: usize,
    pub disputes_raised: usize,
    pub status_counts: Vec<StatusCountEntry>,
    /// Distinct currencies behind the totals, sorted; more than one means the sums mix units.
    pub currencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyRevenueEntry {
    /// Calendar month of release, `YYYY-MM`.
    pub period: String,
    pub releases: usize,
    pub released_gross: i64,
    pub fee_revenue: i64,
}
