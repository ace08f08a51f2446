use std::collections::BTreeMap;
use std::path::Path;

use comfy_table::{Table, presets::UTF8_FULL};
use log::{debug, info, warn};

use crate::aggregate::{Aggregation, WeeklyTrend, daily_aggregations};
use crate::config::PipelineConfig;
use crate::extract::{self, RawTable};
use crate::model::{CleaningReport, DIAGNOSIS_DATE, DIAGNOSIS_DESCRIPTION, PatientRecord, Result};
use crate::quality;
use crate::store::DocumentStore;

pub const RAW_COLLECTION: &str = "healthcare_raw_data";
pub const CLEANING_REPORT_COLLECTION: &str = "cleaning_report";

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub preview_rows: usize,
    pub top: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            preview_rows: 5,
            top: None,
        }
    }
}

/// Documents written per collection during one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub written: BTreeMap<String, usize>,
}

impl RunSummary {
    fn record(&mut self, collection: &str, count: usize) {
        *self.written.entry(collection.to_string()).or_default() += count;
    }

    pub fn to_table(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Collection", "Documents"]);
        for (collection, count) in &self.written {
            table.add_row(vec![collection.clone(), count.to_string()]);
        }
        table.to_string()
    }
}

pub fn report_table(report: &CleaningReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Check", "Value"]);
    table.add_row(vec!["rows_read".to_string(), report.rows_read.to_string()]);
    table.add_row(vec!["rows_dropped".to_string(), report.rows_dropped.to_string()]);
    table.add_row(vec!["duplicate_records".to_string(), report.duplicate_records.to_string()]);
    for (column, count) in report.columns_with_null_count.entries() {
        table.add_row(vec![format!("null {}", column), count.to_string()]);
    }
    let age_median = report.age_median.map(|age| age.to_string());
    table.add_row(vec!["age_median".to_string(), age_median.unwrap_or_else(|| "null".into())]);
    let latest = report.latest_diagnosis_date.map(|date| date.to_string());
    table.add_row(vec!["latest_diagnosis_date".to_string(), latest.unwrap_or_else(|| "null".into())]);
    table.to_string()
}

fn append(
    store: &mut dyn DocumentStore,
    summary: &mut RunSummary,
    collection: &str,
    documents: &[serde_json::Value],
) -> Result<()> {
    let written = store.append(collection, documents)?;
    summary.record(collection, written);
    info!("{} document(s) saved to collection '{}'", written, collection);
    Ok(())
}

pub fn read_and_save_raw_data(
    path: &Path,
    store: &mut dyn DocumentStore,
    summary: &mut RunSummary,
    preview_rows: usize,
) -> Result<RawTable> {
    info!("Reading daily extract {}", path.display());
    let table = extract::read_table(path)?;
    if table.is_empty() {
        warn!("Extract {} has no data rows", path.display());
    }
    info!("First {} row(s) of the raw extract:\n{}", preview_rows, table.preview(preview_rows));
    debug!("Filled cells per column: {:?}", extract::filled_counts(&table));

    append(store, summary, RAW_COLLECTION, &table.documents())?;
    Ok(table)
}

pub fn save_cleaning_report(
    report: &CleaningReport,
    store: &mut dyn DocumentStore,
    summary: &mut RunSummary,
) -> Result<()> {
    info!("Cleaning report:\n{}", report_table(report));
    let document = serde_json::to_value(report)?;
    append(store, summary, CLEANING_REPORT_COLLECTION, &[document])
}

/// Every extract seen so far, coerced but not imputed. Only the columns the
/// weekly trend reads are required.
pub fn load_history(pattern: &str) -> Result<Vec<PatientRecord>> {
    let table = extract::read_tables(pattern)?;
    quality::require_columns(&table, &[DIAGNOSIS_DESCRIPTION, DIAGNOSIS_DATE])?;
    Ok(quality::coerce(&table, &quality::column_positions(&table)))
}

/// Runs one day's extract end to end. The caller advances the date cursor
/// only when this returns `Ok`.
pub fn run(
    config: &PipelineConfig,
    store: &mut dyn DocumentStore,
    options: &RunOptions,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    let raw = read_and_save_raw_data(
        &config.daily_extract_path(),
        store,
        &mut summary,
        options.preview_rows,
    )?;

    let (records, report) = quality::data_quality_check(&raw)?;
    save_cleaning_report(&report, store, &mut summary)?;

    for aggregation in daily_aggregations(options.top) {
        let documents = aggregation.compute(&records)?;
        append(store, &mut summary, aggregation.collection(), &documents)?;
    }

    let history = load_history(&config.history_pattern())?;
    let trend = WeeklyTrend;
    let documents = trend.compute(&history)?;
    append(store, &mut summary, trend.collection(), &documents)?;

    Ok(summary)
}
