use super::common::*;

use chrono::{Duration, NaiveDate};

use crate::escrow::dispute::DisputeOutcome;
use crate::escrow::domain::{EscrowStatus, PartyId};
use crate::escrow::ledger::{LedgerFilter, LedgerStore, Period};

fn mixed_portfolio() -> Harness {
    let harness = build_service();

    let released = harness.completed("proj-1");
    harness
        .service
        .release(&client(), &released.id)
        .expect("release");

    let refunded = harness.disputed("proj-2");
    harness
        .service
        .resolve_dispute(
            &arbiter(),
            &refunded.id,
            DisputeOutcome::Refund,
            "agent never started",
        )
        .expect("refund");

    harness.disputed("proj-3");
    harness.in_progress("proj-4");
    harness.funded("proj-5");
    harness
}

#[test]
fn summary_splits_money_by_where_it_sits() {
    let harness = mixed_portfolio();

    let summary = harness
        .service
        .reports()
        .summary(&LedgerFilter::default())
        .expect("summary");

    assert_eq!(summary.transactions, 5);
    assert_eq!(summary.in_escrow, 2 * GROSS);
    assert_eq!(summary.released_total, GROSS);
    assert_eq!(summary.net_paid_out, NET);
    assert_eq!(summary.fee_revenue, FEE);
    assert_eq!(summary.refunded_total, GROSS);
    assert_eq!(summary.disputed_total, GROSS);
    assert_eq!(summary.open_disputes, 1);
    assert_eq!(summary.disputes_raised, 2);
    assert_eq!(summary.currencies, vec!["USD".to_string()]);

    let counts: Vec<_> = summary
        .status_counts
        .iter()
        .map(|entry| (entry.status_label, entry.count))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("unfunded", 0),
            ("funded", 1),
            ("in_progress", 1),
            ("completed", 0),
            ("dispute", 1),
            ("released", 1),
            ("refunded", 1),
        ]
    );
}

#[test]
fn summary_honours_filters() {
    let harness = mixed_portfolio();
    let reports = harness.service.reports();

    let released = reports
        .summary(&LedgerFilter::with_status(EscrowStatus::Released))
        .expect("summary");
    assert_eq!(released.transactions, 1);
    assert_eq!(released.in_escrow, 0);

    let other_agent = reports
        .summary(&LedgerFilter {
            agent_id: Some(PartyId("agent-9".to_string())),
            ..LedgerFilter::default()
        })
        .expect("summary");
    assert_eq!(other_agent.transactions, 0);

    let after_launch = reports
        .summary(&LedgerFilter {
            period: Some(Period {
                from: NaiveDate::from_ymd_opt(2025, 10, 2),
                to: None,
            }),
            ..LedgerFilter::default()
        })
        .expect("summary");
    assert_eq!(after_launch.transactions, 0);
}

#[test]
fn revenue_is_bucketed_by_release_month() {
    let harness = build_service();
    let october = harness.completed("proj-1");
    harness
        .service
        .release(&client(), &october.id)
        .expect("release");

    harness.clock.advance(Duration::days(31));
    let november = harness.completed("proj-2");
    harness
        .service
        .release(&client(), &november.id)
        .expect("release");
    harness.disputed("proj-3");

    let months = harness
        .service
        .reports()
        .revenue_by_month(&LedgerFilter::default())
        .expect("revenue");

    let periods: Vec<_> = months
        .iter()
        .map(|entry| (entry.period.as_str(), entry.releases, entry.fee_revenue))
        .collect();
    assert_eq!(periods, vec![("2025-10", 1, FEE), ("2025-11", 1, FEE)]);
    assert_eq!(months[0].released_gross, GROSS);
}

#[test]
fn revenue_period_follows_the_release_date() {
    let harness = build_service();
    let funded_in_october = harness.completed("proj-1");
    harness.clock.advance(Duration::days(35));
    harness
        .service
        .release(&client(), &funded_in_october.id)
        .expect("release");

    let november = LedgerFilter {
        period: Some(Period {
            from: NaiveDate::from_ymd_opt(2025, 11, 1),
            to: NaiveDate::from_ymd_opt(2025, 12, 1),
        }),
        ..LedgerFilter::default()
    };
    let months = harness
        .service
        .reports()
        .revenue_by_month(&november)
        .expect("revenue");
    assert_eq!(months.len(), 1);
    assert_eq!(months[0].period, "2025-11");
    assert_eq!(months[0].fee_revenue, FEE);

    let october = LedgerFilter {
        period: Some(Period {
            from: NaiveDate::from_ymd_opt(2025, 10, 1),
            to: NaiveDate::from_ymd_opt(2025, 11, 1),
        }),
        ..LedgerFilter::default()
    };
    assert!(harness
        .service
        .reports()
        .revenue_by_month(&october)
        .expect("revenue")
        .is_empty());
}

#[test]
fn csv_export_writes_one_row_per_transaction() {
    let harness = mixed_portfolio();
    let mut buffer = Vec::new();

    let written = harness
        .service
        .reports()
        .export_csv(&LedgerFilter::default(), &mut buffer)
        .expect("export");
    assert_eq!(written, 5);

    let mut reader = csv::Reader::from_reader(buffer.as_slice());
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.get(0), Some("Transaction ID"));
    assert!(headers.iter().any(|header| header == "Net"));

    let rows: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .expect("rows parse");
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].get(0), Some("esc-000001"));
    assert_eq!(rows[0].get(4), Some("released"));
    assert_eq!(rows[0].get(8), Some("225000"));
}

#[test]
fn reports_never_change_the_ledger() {
    let harness = mixed_portfolio();
    let before = harness
        .ledger
        .query(&LedgerFilter::default())
        .expect("query");

    let reports = harness.service.reports();
    reports.summary(&LedgerFilter::default()).expect("summary");
    reports
        .revenue_by_month(&LedgerFilter::default())
        .expect("revenue");
    reports
        .export_csv(&LedgerFilter::default(), std::io::sink())
        .expect("export");

    let after = harness
        .ledger
        .query(&LedgerFilter::default())
        .expect("query");
    assert_eq!(before, after);
}
