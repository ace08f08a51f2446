use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use log::info;
use serde::{Serialize, Deserialize};

use crate::model::{PipelineError, Result};

pub const DATE_FORMAT: &str = "%Y%m%d";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DateFilePath {
    /// Directory holding the daily `health_data_<date>.csv` extracts.
    pub file_path: PathBuf,
    /// Date of the next extract to process, `YYYYMMDD`.
    pub file_date: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Jsonl,
    Sqlite,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory for `jsonl`, database file for `sqlite`.
    pub location: PathBuf,
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Jsonl,
            location: PathBuf::from("store"),
            database: "healthcare_db".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub date_filepath: DateFilePath,
    #[serde(default)]
    pub store: StoreConfig,
}

impl PipelineConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|err| PipelineError::Config(err.to_string()))?;
        config.cursor()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        Self::parse(&content)
    }

    /// Writes the configuration through a sibling temp file so a crash never
    /// leaves a truncated config behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|err| PipelineError::Config(err.to_string()))?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, content).map_err(|err| PipelineError::io(&tmp, err))?;
        std::fs::rename(&tmp, path).map_err(|err| PipelineError::io(path, err))?;
        Ok(())
    }

    pub fn cursor(&self) -> Result<NaiveDate> {
        let date = &self.date_filepath.file_date;
        NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|_| PipelineError::InvalidDate(date.clone()))
    }

    pub fn daily_extract_path(&self) -> PathBuf {
        self.date_filepath
            .file_path
            .join(format!("health_data_{}.csv", self.date_filepath.file_date))
    }

    /// Glob over every extract in the input directory.
    /// An empty `file_path` means the working directory, as for the daily extract.
    pub fn history_pattern(&self) -> String {
        let dir = self.date_filepath.file_path.display().to_string();
        if dir.is_empty() {
            return "*csv".into();
        }
        format!("{}/*csv", glob::Pattern::escape(dir.trim_end_matches('/')))
    }

    pub fn next_date(&self) -> Result<String> {
        let next = self
            .cursor()?
            .checked_add_days(Days::new(1))
            .ok_or_else(|| PipelineError::InvalidDate(self.date_filepath.file_date.clone()))?;
        Ok(next.format(DATE_FORMAT).to_string())
    }

    /// Moves the cursor to the next day and persists the whole config.
    pub fn advance_and_save(&mut self, path: &Path) -> Result<()> {
        let next = self.next_date()?;
        info!("Advancing processing date {} -> {}", self.date_filepath.file_date, next);
        self.date_filepath.file_date = next;
        self.save(path)
    }
}
