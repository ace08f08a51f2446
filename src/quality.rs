//! Data quality check for a daily extract: schema validation, type coercion,
//! duplicate detection and null imputation.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use log::{info, warn};

use crate::extract::RawTable;
use crate::model::{
    CleaningReport, NullCounts, PatientRecord, PipelineError, REQUIRED_COLUMNS, Result,
};

/// Groups of identical rows larger than this are reported as duplicates.
const DUPLICATE_THRESHOLD: usize = 2;

/// Coerces an age cell to an int. Decimal text truncates toward zero.
pub fn parse_age(value: &str) -> Option<i32> {
    if let Ok(age) = value.parse::<i64>() {
        return i32::try_from(age).ok();
    }

    let age = value.parse::<f64>().ok().filter(|age| age.is_finite())?.trunc();
    if age >= i32::MIN as f64 && age <= i32::MAX as f64 {
        return Some(age as i32);
    }

    None
}

fn iso_to_naive(date: iso8601::Date) -> Option<NaiveDate> {
    match date {
        iso8601::Date::YMD { year, month, day } => NaiveDate::from_ymd_opt(year, month, day),
        iso8601::Date::Week { year, ww, d } => {
            let weekday = Weekday::try_from(u8::try_from(d.checked_sub(1)?).ok()?).ok()?;
            NaiveDate::from_isoywd_opt(year, ww, weekday)
        }
        iso8601::Date::Ordinal { year, ddd } => NaiveDate::from_yo_opt(year, ddd),
    }
}

/// Coerces a diagnosis date cell. Accepts ISO 8601 dates and datetimes; a
/// datetime keeps only its calendar date. Trailing text rejects the cell.
pub fn parse_diagnosis_date(value: &str) -> Option<NaiveDate> {
    if let Ok((rest, datetime)) = iso8601::parsers::parse_datetime(value.as_bytes()) {
        if rest.is_empty() {
            return iso_to_naive(datetime.date);
        }
    }
    if let Ok((rest, date)) = iso8601::parsers::parse_date(value.as_bytes()) {
        if rest.is_empty() {
            return iso_to_naive(date);
        }
    }

    // "2024-01-05 10:30:00"
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|datetime| datetime.date())
}

/// Fails with a schema error naming every listed column the table lacks.
pub fn require_columns(table: &RawTable, columns: &[&str]) -> Result<()> {
    let missing: Vec<String> = columns
        .iter()
        .filter(|column| table.column(column).is_none())
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::Schema(missing));
    }
    Ok(())
}

/// Position of each required column, `None` where the table lacks it.
pub fn column_positions(table: &RawTable) -> [Option<usize>; 6] {
    REQUIRED_COLUMNS.map(|column| table.column(column))
}

pub fn validate_schema(table: &RawTable) -> Result<[Option<usize>; 6]> {
    require_columns(table, &REQUIRED_COLUMNS)?;
    Ok(column_positions(table))
}

/// Projects the required columns and casts each to its record type. Absent
/// columns read as null.
pub fn coerce(table: &RawTable, positions: &[Option<usize>; 6]) -> Vec<PatientRecord> {
    let [patient_id, age, gender, code, description, date] = *positions;
    table
        .rows
        .iter()
        .map(|row| {
            let cell = |position: Option<usize>| position.and_then(|index| row[index].as_deref());
            PatientRecord {
                patient_id: cell(patient_id).map(String::from),
                age: cell(age).and_then(parse_age),
                gender: cell(gender).map(String::from),
                diagnosis_code: cell(code).map(String::from),
                diagnosis_description: cell(description).map(String::from),
                diagnosis_date: cell(date).and_then(parse_diagnosis_date),
            }
        })
        .collect()
}

/// Number of distinct full-row groups occurring more than twice.
pub fn count_duplicates(records: &[PatientRecord]) -> usize {
    let mut groups: HashMap<&PatientRecord, usize> = HashMap::new();
    for record in records {
        *groups.entry(record).or_default() += 1;
    }
    groups.values().filter(|count| **count > DUPLICATE_THRESHOLD).count()
}

/// Exact median; the mean of the middle pair for even counts, truncated.
pub fn median_age(records: &[PatientRecord]) -> Option<i32> {
    let mut ages: Vec<i64> = records.iter().filter_map(|record| record.age.map(i64::from)).collect();
    if ages.is_empty() {
        return None;
    }
    ages.sort_unstable();

    let mid = ages.len() / 2;
    if ages.len() % 2 == 1 {
        return i32::try_from(ages[mid]).ok();
    }
    let median = (ages[mid - 1] + ages[mid]) as f64 / 2.0;
    Some(median.trunc() as i32)
}

pub fn latest_diagnosis_date(records: &[PatientRecord]) -> Option<NaiveDate> {
    records.iter().filter_map(|record| record.diagnosis_date).max()
}

pub fn data_quality_check(table: &RawTable) -> Result<(Vec<PatientRecord>, CleaningReport)> {
    let positions = validate_schema(table)?;
    info!("Mandatory columns verification is completed");

    let records = coerce(table, &positions);
    info!("Mandatory columns casted to their record types");

    let duplicate_records = count_duplicates(&records);
    if duplicate_records > 0 {
        warn!("{} duplicate record group(s) in the extract", duplicate_records);
    }

    let null_counts = NullCounts::tally(&records);
    info!("Null counts per column: {:?}", null_counts);

    let rows_read = records.len();
    let mut records: Vec<PatientRecord> = records
        .into_iter()
        .filter(|record| record.patient_id.is_some())
        .collect();
    let rows_dropped = rows_read - records.len();
    if rows_dropped > 0 {
        warn!("Dropped {} row(s) without a patient_id", rows_dropped);
    }

    let age_median = median_age(&records);
    let latest_date = latest_diagnosis_date(&records);
    for record in records.iter_mut() {
        if record.age.is_none() {
            record.age = age_median;
        }
        if record.diagnosis_date.is_none() {
            record.diagnosis_date = latest_date;
        }
    }
    info!("age_median: {:?}, latest_date: {:?}", age_median, latest_date);

    let report = CleaningReport {
        missing_columns: Vec::new(),
        duplicate_records,
        columns_with_null_count: null_counts,
        rows_read,
        rows_dropped,
        age_median,
        latest_diagnosis_date: latest_date,
    };
    Ok((records, report))
}
