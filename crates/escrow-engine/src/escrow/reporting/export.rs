use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ReportError;
use crate::escrow::domain::EscrowTransaction;

#[derive(Debug, Serialize)]
struct LedgerRow<'a> {
    #[serde(rename = "Transaction ID")]
    transaction_id: &'a str,
    #[serde(rename = "Project ID")]
    project_id: &'a str,
    #[serde(rename = "Client ID")]
    client_id: &'a str,
    #[serde(rename = "Agent ID")]
    agent_id: &'a str,
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Currency")]
    currency: &'a str,
    #[serde(rename = "Gross")]
    gross: i64,
    #[serde(rename = "Fee")]
    fee: i64,
    #[serde(rename = "Net")]
    net: i64,
    #[serde(rename = "Created At")]
    created_at: String,
    #[serde(rename = "Funded At")]
    funded_at: String,
    #[serde(rename = "Released At")]
    released_at: String,
    #[serde(rename = "Refunded At")]
    refunded_at: String,
    #[serde(rename = "Events")]
    events: usize,
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map(|at| at.to_rfc3339()).unwrap_or_default()
}

pub(super) fn write_csv<W: Write>(
    transactions: &[EscrowTransaction],
    writer: W,
) -> Result<usize, ReportError> {
    let mut csv_writer = csv::WriterBuilder::new().from_writer(writer);

    for transaction in transactions {
        csv_writer.serialize(LedgerRow {
            transaction_id: &transaction.id.0,
            project_id: &transaction.project_id.0,
            client_id: &transaction.client_id.0,
            agent_id: &transaction.agent_id.0,
            status: transaction.status.label(),
            currency: &transaction.currency,
            gross: transaction.gross_amount,
            fee: transaction.platform_fee,
            net: transaction.net_amount,
            created_at: transaction.created_at.to_rfc3339(),
            funded_at: timestamp(transaction.funded_at),
            released_at: timestamp(transaction.released_at),
            refunded_at: timestamp(transaction.refunded_at),
            events: transaction.timeline.len(),
        })?;
    }

    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(transactions.len())
}
