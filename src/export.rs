//! CSV export of listing records
//!
//! Detail enrichment runs one request at a time with a fixed delay between
//! requests and a longer pause every `batch_size` records. Cancelling the
//! token stops the loop at the next request or pause.

use std::path::Path;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use indexmap::IndexSet;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::Result;
use crate::fetcher::DetailFetcher;
use crate::profiles::SiteProfile;
use crate::record::PropertyRecord;

/// Spreadsheet applications need the BOM to detect UTF-8
pub const UTF8_BOM: &str = "\u{feff}";

/// A finished export, ready to be handed to the user
#[derive(Debug, Clone, Serialize)]
pub struct ExportFile {
    pub filename: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub report: ExportReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub records: Vec<PropertyRecord>,
    /// Records whose detail page was requested
    pub enriched: usize,
    /// Requests that came back without any fields
    pub empty_details: usize,
    pub cancelled: bool,
}

/// Visit each record's detail page and merge the fields found there.
///
/// Records are returned in their original order. After cancellation the
/// records not yet visited are returned unchanged.
pub async fn enrich_records<F>(
    records: Vec<PropertyRecord>,
    profile: &SiteProfile,
    fetcher: &F,
    settings: &Settings,
    cancel: &CancellationToken,
) -> ExportReport
where
    F: DetailFetcher + ?Sized,
{
    let total = records.len();
    let mut report = ExportReport {
        records: Vec::with_capacity(total),
        ..ExportReport::default()
    };

    for mut record in records {
        if report.cancelled {
            report.records.push(record);
            continue;
        }

        let Some(url) = record.detail_url().map(str::to_string) else {
            debug!(index = report.records.len(), "record has no detail url");
            report.records.push(record);
            continue;
        };

        if report.enriched > 0 {
            let delay = pacing_delay(report.enriched, settings);
            if pause(delay, cancel).await {
                info!(done = report.enriched, total, "export cancelled");
                report.cancelled = true;
                report.records.push(record);
                continue;
            }
        } else if cancel.is_cancelled() {
            report.cancelled = true;
            report.records.push(record);
            continue;
        }

        info!(index = report.records.len() + 1, total, url = %url, "fetching detail page");
        let details = fetcher.fetch_fields(&url, profile).await;
        if details.is_empty() {
            report.empty_details += 1;
        }
        record.merge_details(&details);
        report.enriched += 1;
        report.records.push(record);
    }

    info!(
        total,
        enriched = report.enriched,
        empty = report.empty_details,
        cancelled = report.cancelled,
        "export finished"
    );
    report
}

/// Export action: enrich the page's records and render them as CSV.
///
/// A cancelled export still produces a file with what was gathered.
pub async fn export_listing<F>(
    records: Vec<PropertyRecord>,
    profile: &SiteProfile,
    fetcher: &F,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Result<ExportFile>
where
    F: DetailFetcher + ?Sized,
{
    let report = enrich_records(records, profile, fetcher, settings, cancel).await;
    let bytes = write_csv(&report.records)?;
    Ok(ExportFile {
        filename: export_filename_today(profile.id),
        bytes,
        report,
    })
}

/// Delay before the next request, given how many were already made
fn pacing_delay(done: usize, settings: &Settings) -> Duration {
    if settings.batch_size > 0 && done % settings.batch_size == 0 {
        settings.batch_pause()
    } else {
        settings.request_delay()
    }
}

/// Sleep unless cancelled first. Returns whether the token fired.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Render records as BOM-prefixed CSV.
///
/// The header is the union of field names in first-seen order; missing
/// fields are empty. Fields containing a comma, quote or newline are
/// quoted with inner quotes doubled.
pub fn write_csv(records: &[PropertyRecord]) -> Result<Vec<u8>> {
    let headers: IndexSet<&str> = records
        .iter()
        .flat_map(|r| r.fields().map(|(name, _)| name))
        .collect();

    let mut out = UTF8_BOM.as_bytes().to_vec();
    {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Necessary)
            .from_writer(&mut out);

        writer.write_record(headers.iter())?;
        for record in records {
            writer.write_record(headers.iter().map(|h| record.get(h).unwrap_or_default()))?;
        }
        writer.flush()?;
    }
    Ok(out)
}

/// Write the CSV to `path`
pub fn save_csv(path: impl AsRef<Path>, records: &[PropertyRecord]) -> Result<()> {
    let bytes = write_csv(records)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// `unit-price_<site>_<YYYYMMDD>.csv`
pub fn export_filename(site_id: &str, date: NaiveDate) -> String {
    format!("unit-price_{site_id}_{}.csv", date.format("%Y%m%d"))
}

pub fn export_filename_today(site_id: &str) -> String {
    export_filename(site_id, Local::now().date_naive())
}
