mod export;
mod summary;
pub mod views;

use std::io::Write;
use std::sync::Arc;

use super::ledger::{LedgerError, LedgerFilter, LedgerStore};
use views::{EscrowSummary, MonthlyRevenueEntry};

/// Read-only aggregations over the ledger for dashboards. Never mutates.
pub struct EscrowReports<L> {
    ledger: Arc<L>,
}

impl<L> EscrowReports<L>
where
    L: LedgerStore,
{
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    pub fn summary(&self, filter: &LedgerFilter) -> Result<EscrowSummary, ReportError> {
        let transactions = self.ledger.query(filter)?;
        Ok(summary::summarize(&transactions))
    }

    /// Fee revenue per month of release. The filter's period bounds the release date, not
    /// the creation date, so work funded in one month and paid out in the next counts once.
    pub fn revenue_by_month(
        &self,
        filter: &LedgerFilter,
    ) -> Result<Vec<MonthlyRevenueEntry>, ReportError> {
        let by_party = LedgerFilter {
            period: None,
            ..filter.clone()
        };
        let transactions = self.ledger.query(&by_party)?;
        Ok(summary::monthly_revenue(&transactions, filter.period))
    }

    /// Write one CSV row per matching transaction for audit exports.
    pub fn export_csv<W: Write>(&self, filter: &LedgerFilter, writer: W) -> Result<usize, ReportError> {
        let transactions = self.ledger.query(filter)?;
        export::write_csv(&transactions, writer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to write CSV export: {0}")]
    Csv(#[from] csv::Error),
}
