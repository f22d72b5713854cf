// src/process/batch.rs
use futures::{stream::FuturesUnordered, StreamExt};
use std::time::Instant;
use tracing::{info, instrument, warn};

use super::{columns, RawRow};
use crate::normalize::{verify_or_fallback, AddressNormalizer, VerifiedAddress};

/// Column headers of a [`MergedRow`], in output order.
pub const MERGED_COLUMNS: [&str; 24] = [
    columns::NAME,
    columns::COMPANY,
    columns::ADDRESS1,
    columns::ADDRESS2,
    columns::ADDRESS3,
    columns::CITY,
    columns::STATE,
    columns::ZONE,
    columns::POSTAL_CODE,
    columns::COUNTRY,
    columns::ORDER_NUMBER,
    columns::CUSTOMER_EMAIL,
    columns::ORIGINAL_ADDRESS,
    columns::VERIFIED_ADDRESS,
    "verified Ship To - Name",
    "verified Ship To - Company",
    "verified Ship To - Address 1",
    "verified Ship To - Address 2",
    "verified Ship To - Address 3",
    "verified Ship To - City",
    "verified Ship To - State",
    "verified Ship To - Zone",
    "verified Ship To - Postal Code",
    "verified Ship To - Country",
];

/// An input row joined with its verification result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedRow {
    /// Known shipping-label values, aligned with [`columns::KNOWN`].
    pub original: [String; 12],
    pub original_address: String,
    pub verified_name: String,
    pub verified_company: String,
    /// Zone already resolved against the input row.
    pub verified: VerifiedAddress,
    /// Input columns outside the known set, in header order.
    pub extra: Vec<(String, String)>,
}

impl MergedRow {
    fn from_parts(row: &RawRow, address: Option<&str>, verified: Option<VerifiedAddress>) -> Self {
        let original = columns::KNOWN.map(|c| row.get(c).to_string());
        let extra = row
            .fields()
            .iter()
            .filter(|(k, _)| !columns::KNOWN.contains(&k.as_str()))
            .cloned()
            .collect();

        match (address, verified) {
            (Some(address), Some(mut verified)) => {
                if verified.zone.is_empty() {
                    verified.zone = row.get(columns::ZONE).to_string();
                }
                Self {
                    original,
                    original_address: address.to_string(),
                    verified_name: row.get(columns::NAME).to_string(),
                    verified_company: row.get(columns::COMPANY).to_string(),
                    verified,
                    extra,
                }
            }
            _ => Self {
                original,
                extra,
                ..Self::default()
            },
        }
    }

    pub fn customer_email(&self) -> &str {
        &self.original[11]
    }

    /// Cell values aligned with [`MERGED_COLUMNS`].
    pub fn values(&self) -> [&str; 24] {
        let o = &self.original;
        let v = &self.verified;
        [
            o[0].as_str(),
            o[1].as_str(),
            o[2].as_str(),
            o[3].as_str(),
            o[4].as_str(),
            o[5].as_str(),
            o[6].as_str(),
            o[7].as_str(),
            o[8].as_str(),
            o[9].as_str(),
            o[10].as_str(),
            o[11].as_str(),
            self.original_address.as_str(),
            v.full_address.as_str(),
            self.verified_name.as_str(),
            self.verified_company.as_str(),
            v.address1.as_str(),
            v.address2.as_str(),
            v.address3.as_str(),
            v.city.as_str(),
            v.state.as_str(),
            v.zone.as_str(),
            v.postal_code.as_str(),
            v.country.as_str(),
        ]
    }
}

/// Verify every row against `normalizer`, at most `max_in_flight` calls at a
/// time, and return one [`MergedRow`] per input row in input order.
///
/// Rows without any address parts are never sent; they come back with blank
/// verified columns. A failed call degrades to the fallback record and never
/// aborts the batch.
#[instrument(level = "info", skip(normalizer, rows), fields(rows = rows.len()))]
pub async fn verify_rows(
    normalizer: &dyn AddressNormalizer,
    rows: &[RawRow],
    max_in_flight: usize,
) -> Vec<MergedRow> {
    let start = Instant::now();
    let max_in_flight = max_in_flight.max(1);

    let addresses: Vec<Option<String>> = rows.iter().map(RawRow::address_string).collect();
    let mut results: Vec<Option<VerifiedAddress>> = vec![None; rows.len()];

    let mut tasks = FuturesUnordered::new();
    let mut sent = 0usize;

    for (idx, address) in addresses.iter().enumerate() {
        let Some(address) = address.as_deref() else {
            continue;
        };
        sent += 1;
        tasks.push(async move {
            let verified = match verify_or_fallback(normalizer, address).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(row = idx, error = %e, "verification rejected, using fallback");
                    VerifiedAddress::fallback(address)
                }
            };
            (idx, verified)
        });

        // throttle concurrency
        if tasks.len() >= max_in_flight {
            if let Some((i, v)) = tasks.next().await {
                results[i] = Some(v);
            }
        }
    }

    // drain remaining tasks
    while let Some((i, v)) = tasks.next().await {
        results[i] = Some(v);
    }

    let merged: Vec<MergedRow> = rows
        .iter()
        .zip(addresses.iter())
        .zip(results)
        .map(|((row, address), verified)| MergedRow::from_parts(row, address.as_deref(), verified))
        .collect();

    info!(
        sent,
        skipped = rows.len() - sent,
        elapsed = ?start.elapsed(),
        "batch verified"
    );
    merged
}
