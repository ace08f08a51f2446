use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use comfy_table::{Table, presets::UTF8_FULL};
use log::{debug, info};
use serde_json::{Map, Number, Value};

use crate::model::{PipelineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Double,
    Boolean,
    String,
}

impl ColumnType {
    fn accepts(self, value: &str) -> bool {
        match self {
            ColumnType::Integer => value.parse::<i64>().is_ok(),
            ColumnType::Double => value.parse::<f64>().is_ok_and(f64::is_finite),
            ColumnType::Boolean => {
                value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
            }
            ColumnType::String => true,
        }
    }

    fn to_value(self, value: &str) -> Value {
        match self {
            ColumnType::Integer => value
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnType::Double => value
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnType::Boolean => Value::Bool(value.eq_ignore_ascii_case("true")),
            ColumnType::String => Value::String(value.to_string()),
        }
    }
}

/// A header-keyed CSV extract with untyped cells. Empty cells are `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    /// Concatenates tables by column name. Columns a table lacks read as null.
    pub fn union(tables: Vec<RawTable>) -> RawTable {
        let mut headers: Vec<String> = Vec::new();
        for table in &tables {
            for header in &table.headers {
                if !headers.contains(header) {
                    headers.push(header.clone());
                }
            }
        }

        let mut rows = Vec::new();
        for table in tables {
            let positions: Vec<Option<usize>> = headers
                .iter()
                .map(|header| table.column(header))
                .collect();
            for mut row in table.rows {
                rows.push(
                    positions
                        .iter()
                        .map(|position| position.and_then(|index| row[index].take()))
                        .collect(),
                );
            }
        }

        RawTable { headers, rows }
    }

    /// Infers one type per column, widening integer -> double -> boolean -> string
    /// until every non-null value fits.
    pub fn column_types(&self) -> Vec<ColumnType> {
        const CANDIDATES: [ColumnType; 3] =
            [ColumnType::Integer, ColumnType::Double, ColumnType::Boolean];

        (0..self.headers.len())
            .map(|index| {
                let mut values = self.rows.iter().filter_map(|row| row[index].as_deref()).peekable();
                if values.peek().is_none() {
                    return ColumnType::String;
                }
                let values: Vec<&str> = values.collect();
                CANDIDATES
                    .into_iter()
                    .find(|candidate| values.iter().all(|value| candidate.accepts(value)))
                    .unwrap_or(ColumnType::String)
            })
            .collect()
    }

    /// Rows as JSON documents, typed by the inferred column types.
    pub fn documents(&self) -> Vec<Value> {
        let types = self.column_types();
        self.rows
            .iter()
            .map(|row| {
                let mut document = Map::new();
                for ((header, cell), column_type) in self.headers.iter().zip(row).zip(&types) {
                    let value = match cell {
                        Some(cell) => column_type.to_value(cell),
                        None => Value::Null,
                    };
                    document.insert(header.clone(), value);
                }
                Value::Object(document)
            })
            .collect()
    }

    pub fn preview(&self, limit: usize) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(self.headers.clone());
        for row in self.rows.iter().take(limit) {
            table.add_row(
                row.iter()
                    .map(|cell| cell.as_deref().unwrap_or("null").to_string())
                    .collect::<Vec<_>>(),
            );
        }
        table.to_string()
    }
}

pub fn parse_table(data: impl Read) -> Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(PipelineError::Parse("Missing header row".into()));
    }

    let header_count = headers.len();
    let mut rows = Vec::new();
    for (index, record) in rdr.records().enumerate() {
        let values = record?;
        if values.len() != header_count {
            return Err(PipelineError::Parse(format!(
                "Field count {} is not equal to header count {} on data row {}",
                values.len(),
                header_count,
                index + 1
            )));
        }

        rows.push(
            values
                .iter()
                .map(|value| {
                    let value = value.trim();
                    (!value.is_empty()).then(|| value.to_string())
                })
                .collect(),
        );
    }

    Ok(RawTable { headers, rows })
}

pub fn read_table(path: &Path) -> Result<RawTable> {
    let file = std::fs::File::open(path).map_err(|err| PipelineError::io(path, err))?;
    let table = parse_table(file)?;
    debug!("Read {} rows x {} columns from {}", table.len(), table.headers.len(), path.display());
    Ok(table)
}

/// Reads and unions every file matching `pattern`, in path order.
pub fn read_tables(pattern: &str) -> Result<RawTable> {
    let mut paths = Vec::new();
    for entry in glob::glob(pattern)? {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(err) => {
                let path = err.path().to_path_buf();
                return Err(PipelineError::io(path, err.into_error()));
            }
        }
    }
    paths.sort();

    let mut tables = Vec::with_capacity(paths.len());
    for path in &paths {
        tables.push(read_table(path)?);
    }
    let table = RawTable::union(tables);
    info!("Read {} rows from {} file(s) matching {}", table.len(), paths.len(), pattern);
    Ok(table)
}

/// Column name to non-null value count; handy for log summaries.
pub fn filled_counts(table: &RawTable) -> BTreeMap<&str, usize> {
    table
        .headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            let filled = table.rows.iter().filter(|row| row[index].is_some()).count();
            (header.as_str(), filled)
        })
        .collect()
}
