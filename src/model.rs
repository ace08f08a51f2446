use serde::{Serialize, Deserialize};
use chrono::NaiveDate;
use thiserror::Error;

pub const PATIENT_ID: &str = "patient_id";
pub const AGE: &str = "age";
pub const GENDER: &str = "gender";
pub const DIAGNOSIS_CODE: &str = "diagnosis_code";
pub const DIAGNOSIS_DESCRIPTION: &str = "diagnosis_description";
pub const DIAGNOSIS_DATE: &str = "diagnosis_date";

/// Columns every daily extract must carry, in output order.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    PATIENT_ID,
    AGE,
    GENDER,
    DIAGNOSIS_CODE,
    DIAGNOSIS_DESCRIPTION,
    DIAGNOSIS_DATE,
];

/// One extract row after type coercion.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PatientRecord {
    pub patient_id: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub diagnosis_code: Option<String>,
    pub diagnosis_description: Option<String>,
    pub diagnosis_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NullCounts {
    pub patient_id: usize,
    pub age: usize,
    pub gender: usize,
    pub diagnosis_code: usize,
    pub diagnosis_description: usize,
    pub diagnosis_date: usize,
}

impl NullCounts {
    pub fn tally(records: &[PatientRecord]) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.patient_id += record.patient_id.is_none() as usize;
            counts.age += record.age.is_none() as usize;
            counts.gender += record.gender.is_none() as usize;
            counts.diagnosis_code += record.diagnosis_code.is_none() as usize;
            counts.diagnosis_description += record.diagnosis_description.is_none() as usize;
            counts.diagnosis_date += record.diagnosis_date.is_none() as usize;
        }
        counts
    }

    pub fn entries(&self) -> [(&'static str, usize); 6] {
        [
            (PATIENT_ID, self.patient_id),
            (AGE, self.age),
            (GENDER, self.gender),
            (DIAGNOSIS_CODE, self.diagnosis_code),
            (DIAGNOSIS_DESCRIPTION, self.diagnosis_description),
            (DIAGNOSIS_DATE, self.diagnosis_date),
        ]
    }
}

/// Outcome of the data quality check, persisted once per run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CleaningReport {
    pub missing_columns: Vec<String>,
    pub duplicate_records: usize,
    pub columns_with_null_count: NullCounts,
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub age_median: Option<i32>,
    pub latest_diagnosis_date: Option<NaiveDate>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Mandatory column(s) missing from the extract: {}", .0.join(", "))]
    Schema(Vec<String>),

    #[error("Invalid date '{0}', expected YYYYMMDD")]
    InvalidDate(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(patient_id: Option<&str>, age: Option<i32>) -> PatientRecord {
        PatientRecord {
            patient_id: patient_id.map(String::from),
            age,
            gender: Some("F".into()),
            diagnosis_code: None,
            diagnosis_description: Some("Diabetes".into()),
            diagnosis_date: None,
        }
    }

    #[test]
    fn null_counts_tally_each_column() {
        let records = vec![record(Some("P1"), None), record(None, Some(40))];
        let counts = NullCounts::tally(&records);
        assert_eq!(counts.patient_id, 1);
        assert_eq!(counts.age, 1);
        assert_eq!(counts.gender, 0);
        assert_eq!(counts.diagnosis_code, 2);
        assert_eq!(counts.diagnosis_date, 2);
    }

    #[test]
    fn schema_error_names_every_column() {
        let err = PipelineError::Schema(vec!["age".into(), "gender".into()]);
        assert_eq!(
            err.to_string(),
            "Mandatory column(s) missing from the extract: age, gender"
        );
    }
}
