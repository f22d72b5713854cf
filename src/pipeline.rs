// src/pipeline.rs
use anyhow::{Context, Result};
use reqwest::Client;
use std::{path::PathBuf, sync::Arc, time::Instant};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::deliver::{
    dispatch_all, AttachmentRelay, BatchEmailDispatcher, Delivery, Dispatcher,
    LocalFileDispatcher, SendGridClient,
};
use crate::normalize::AddressNormalizer;
use crate::process::{extract_rows, verify_rows, write_workbook, Artifact, MergedRow};

/// Dispatchers for one batch, plus a status line for each one that could not
/// be built from the configuration.
#[derive(Default)]
pub struct Dispatchers {
    pub enabled: Vec<Box<dyn Dispatcher>>,
    pub disabled: Vec<String>,
}

impl Dispatchers {
    pub fn new(enabled: Vec<Box<dyn Dispatcher>>) -> Self {
        Self {
            enabled,
            disabled: Vec::new(),
        }
    }

    /// Local save always runs first. The relay and customer emails are added
    /// when requested; a missing key disables only that dispatcher.
    pub fn from_config(
        http: &Client,
        cfg: &Config,
        output_dir: PathBuf,
        relay: bool,
        email_customers: bool,
    ) -> Self {
        let mut set = Self::new(vec![Box::new(LocalFileDispatcher::new(output_dir))]);
        if relay {
            match AttachmentRelay::from_config(http.clone(), cfg) {
                Ok(relay) => set.enabled.push(Box::new(relay)),
                Err(e) => set.disable("send to Slack", e),
            }
        }
        if email_customers {
            match SendGridClient::from_config(http.clone(), cfg) {
                Ok(sg) => set
                    .enabled
                    .push(Box::new(BatchEmailDispatcher::new(Arc::new(sg)))),
                Err(e) => set.disable("email customers", e),
            }
        }
        set
    }

    fn disable(&mut self, name: &str, e: anyhow::Error) {
        warn!(dispatcher = name, error = %e, "dispatcher disabled");
        self.disabled.push(format!("Failed to {name}: {e:#}"));
    }
}

/// Outcome of one batch upload.
#[derive(Debug)]
pub struct BatchReport {
    pub rows: Vec<MergedRow>,
    pub artifact: Artifact,
    /// Progress lines in the order they happened, dispatcher results included.
    pub status: Vec<String>,
}

/// Extract, verify and serialize one uploaded file, then hand the workbook to
/// each dispatcher in turn.
///
/// Only extraction and serialization failures are errors. Row failures
/// degrade to fallback records and dispatcher failures become status lines.
#[instrument(level = "info", skip(bytes, normalizer, dispatchers))]
pub async fn run_batch(
    file_name: &str,
    bytes: &[u8],
    normalizer: &dyn AddressNormalizer,
    dispatchers: &Dispatchers,
    max_in_flight: usize,
) -> Result<BatchReport> {
    let start = Instant::now();
    let mut status = vec!["Processing addresses...".to_string()];

    let raw = extract_rows(file_name, bytes).context("Failed to process addresses")?;
    let rows = verify_rows(normalizer, &raw, max_in_flight).await;
    let artifact = write_workbook(&rows).context("Failed to process addresses")?;
    status.push(format!("Verified {} rows into {}", rows.len(), artifact.filename));

    let delivery = Delivery {
        artifact: &artifact,
        rows: &rows,
    };
    status.extend(dispatchers.disabled.iter().cloned());
    status.extend(dispatch_all(&dispatchers.enabled, &delivery).await);
    status.push("Processing complete!".to_string());

    info!(rows = rows.len(), elapsed = ?start.elapsed(), "batch complete");
    Ok(BatchReport {
        rows,
        artifact,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliver::tests::Fake;
    use crate::normalize::tests::Canned;
    use crate::process::columns;
    use std::sync::atomic::Ordering;

    const CSV: &str = "Ship To - Name,Ship To - Address 1,Ship To - City,Ship To - Country,Customer Email\n\
                       Sherlock,221B Baker St,London,UK,sherlock@example.com\n\
                       Nobody,,,,\n";

    const VERIFIED: &str = r#"{"address1":"221B Baker Street","address2":"","address3":"","city":"London","state":"Greater London","zone":"","postalCode":"NW1 6XE","country":"United Kingdom","fullAddress":"221B Baker Street, London NW1 6XE, United Kingdom"}"#;

    #[tokio::test]
    async fn test_end_to_end_with_failing_dispatcher() -> Result<()> {
        let n = Canned::ok(VERIFIED);
        let dispatchers = Dispatchers::new(vec![
            Box::new(Fake::new("save file locally", false)),
            Box::new(Fake::new("send to Slack", true)),
        ]);

        let report = run_batch("orders.csv", CSV.as_bytes(), &n, &dispatchers, 4).await?;

        assert_eq!(n.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].original_address, "221B Baker St, London, UK");
        assert_eq!(report.rows[0].verified.postal_code, "NW1 6XE");
        assert_eq!(report.rows[1].original[0], "Nobody");
        assert!(report.rows[1].values()[12..].iter().all(|v| v.is_empty()));

        assert!(!report.artifact.bytes.is_empty());
        assert_eq!(report.status.first().unwrap(), "Processing addresses...");
        assert!(report
            .status
            .iter()
            .any(|s| s == "Failed to send to Slack: connection refused"));
        assert_eq!(report.status.last().unwrap(), "Processing complete!");
        Ok(())
    }

    #[tokio::test]
    async fn test_every_row_kept_when_normalizer_is_down() -> Result<()> {
        let n = Canned::failing(500);
        let csv = format!(
            "{},{}\n1 A St,X\n2 B St,Y\n3 C St,Z\n",
            columns::ADDRESS1,
            columns::CITY
        );
        let report = run_batch("in.csv", csv.as_bytes(), &n, &Dispatchers::default(), 2).await?;
        let originals: Vec<&str> = report
            .rows
            .iter()
            .map(|r| r.verified.full_address.as_str())
            .collect();
        assert_eq!(originals, vec!["1 A St, X", "2 B St, Y", "3 C St, Z"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_spreadsheet_is_an_error() {
        let n = Canned::ok(VERIFIED);
        let err = run_batch("broken.xlsx", b"PK\x03\x04garbage", &n, &Dispatchers::default(), 4)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to process addresses"));
        assert_eq!(n.calls.load(Ordering::SeqCst), 0);
    }

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| {
            map.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn test_missing_keys_disable_only_that_dispatcher() {
        let cfg = config(&[
            ("SENDGRID_API_KEY", "sg-key"),
            ("SENDGRID_FROM_EMAIL", "shop@example.com"),
            ("APP_URL", "https://shop.example"),
        ]);
        let set = Dispatchers::from_config(&Client::new(), &cfg, PathBuf::from("out"), true, true);

        let names: Vec<&str> = set.enabled.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["save file locally", "email customers"]);
        assert_eq!(set.disabled.len(), 1);
        assert!(set.disabled[0].starts_with("Failed to send to Slack: "));
        assert!(set.disabled[0].contains("EMAILJS_SERVICE_ID"));
    }

    #[test]
    fn test_unrequested_dispatchers_are_not_built() {
        let set = Dispatchers::from_config(&Client::new(), &config(&[]), PathBuf::from("out"), false, false);
        assert_eq!(set.enabled.len(), 1);
        assert!(set.disabled.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_dispatchers_reported_after_workbook() -> Result<()> {
        let n = Canned::ok(VERIFIED);
        let set = Dispatchers::from_config(&Client::new(), &config(&[]), std::env::temp_dir(), false, true);
        let set = Dispatchers {
            enabled: vec![Box::new(Fake::new("save file locally", false))],
            ..set
        };

        let report = run_batch("orders.csv", CSV.as_bytes(), &n, &set, 4).await?;

        let pos = |needle: &str| report.status.iter().position(|s| s.starts_with(needle));
        let verified = pos("Verified 2 rows").unwrap();
        let disabled = pos("Failed to email customers: ").unwrap();
        assert_eq!(report.status[0], "Processing addresses...");
        assert!(verified < disabled);
        assert!(disabled < report.status.len() - 1);
        assert_eq!(report.status.last().unwrap(), "Processing complete!");
        Ok(())
    }
}
