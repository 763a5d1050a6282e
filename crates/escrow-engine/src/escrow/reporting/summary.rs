use std::collections::{BTreeMap, BTreeSet};

use super::views::{EscrowSummary, MonthlyRevenueEntry, StatusCountEntry};
use crate::escrow::domain::{EscrowStatus, EscrowTransaction, TimelineEventKind};
use crate::escrow::ledger::Period;

pub(super) fn summarize(transactions: &[EscrowTransaction]) -> EscrowSummary {
    let mut counts: BTreeMap<EscrowStatus, usize> = BTreeMap::new();
    let mut currencies = BTreeSet::new();
    let mut summary = EscrowSummary {
        transactions: transactions.len(),
        in_escrow: 0,
        released_total: 0,
        net_paid_out: 0,
        refunded_total: 0,
        fee_revenue: 0,
        disputed_total: 0,
        open_disputes: 0,
        disputes_raised: 0,
        status_counts: Vec::new(),
        currencies: Vec::new(),
    };

    for transaction in transactions {
        *counts.entry(transaction.status).or_default() += 1;
        currencies.insert(transaction.currency.clone());

        match transaction.status {
            status if status.holds_funds() => summary.in_escrow += transaction.gross_amount,
            EscrowStatus::Released => {
                summary.released_total += transaction.gross_amount;
                summary.net_paid_out += transaction.net_amount;
                summary.fee_revenue += transaction.platform_fee;
            }
            EscrowStatus::Refunded => summary.refunded_total += transaction.gross_amount,
            EscrowStatus::Dispute => {
                summary.open_disputes += 1;
                summary.disputed_total += transaction.gross_amount;
            }
            _ => {}
        }

        if transaction.has_event(TimelineEventKind::DisputeRaised) {
            summary.disputes_raised += 1;
        }
    }

    summary.status_counts = EscrowStatus::ordered()
        .into_iter()
        .map(|status| StatusCountEntry {
            status,
            status_label: status.label(),
            count: counts.get(&status).copied().unwrap_or(0),
        })
        .collect();
    summary.currencies = currencies.into_iter().collect();

    summary
}

/// Buckets released escrows by month of release; `period` bounds the release date.
pub(super) fn monthly_revenue(
    transactions: &[EscrowTransaction],
    period: Option<Period>,
) -> Vec<MonthlyRevenueEntry> {
    let mut months: BTreeMap<String, MonthlyRevenueEntry> = BTreeMap::new();

    for transaction in transactions {
        let Some(released_at) = transaction.released_at else {
            continue;
        };
        if !period.map_or(true, |period| period.contains(released_at.date_naive())) {
            continue;
        }
        let period = released_at.format("%Y-%m").to_string();
        let entry = months
            .entry(period.clone())
            .or_insert_with(|| MonthlyRevenueEntry {
                period,
                releases: 0,
                released_gross: 0,
                fee_revenue: 0,
            });
        entry.releases += 1;
        entry.released_gross += transaction.gross_amount;
        entry.fee_revenue += transaction.platform_fee;
    }

    months.into_values().collect()
}
