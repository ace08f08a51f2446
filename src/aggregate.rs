use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::Datelike;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::model::{PatientRecord, PipelineError, Result};

pub const SENIOR_AGE: i32 = 60;

/// A read-only summary over cleaned records, persisted to its own collection.
pub trait Aggregation {
    fn collection(&self) -> &'static str;
    fn compute(&self, records: &[PatientRecord]) -> Result<Vec<Value>>;
}

pub fn to_documents<T: Serialize>(rows: &[T]) -> Result<Vec<Value>> {
    rows.iter()
        .map(|row| serde_json::to_value(row).map_err(PipelineError::from))
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenderRatio {
    pub diagnosis_code: Option<String>,
    pub ratio: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiseaseCount {
    pub disease: Option<String>,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgeCategoryCount {
    pub age_group: String,
    pub diagnosis_description: Option<String>,
    pub diagnosis_code: Option<String>,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeniorCitizenFlag {
    pub patient_id: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub diagnosis_description: Option<String>,
    pub senior_citizen_flag: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeekdayTrend {
    pub diagnosis_description: Option<String>,
    pub dayofweek: Option<u32>,
    pub count: usize,
}

/// Rounds half up on the shortest decimal form of `value`, so 1.005 gives 1.01.
fn round2(value: f64) -> f64 {
    Decimal::from_str(&value.to_string())
        .ok()
        .map(|decimal| decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|decimal| decimal.to_f64())
        .unwrap_or_else(|| (value * 100.0).round() / 100.0)
}

/// Male to female patient ratio per diagnosis code. Codes missing either
/// gender have no ratio.
pub fn disease_gender_ratio(records: &[PatientRecord]) -> Vec<GenderRatio> {
    let mut counts: BTreeMap<Option<&str>, (usize, usize)> = BTreeMap::new();
    for record in records {
        let entry = counts.entry(record.diagnosis_code.as_deref()).or_default();
        match record.gender.as_deref() {
            Some("M") => entry.0 += 1,
            Some("F") => entry.1 += 1,
            _ => {}
        }
    }

    counts
        .into_iter()
        .map(|(code, (male, female))| GenderRatio {
            diagnosis_code: code.map(String::from),
            ratio: (male > 0 && female > 0).then(|| round2(male as f64 / female as f64)),
        })
        .collect()
}

pub fn most_common_diseases(records: &[PatientRecord], limit: Option<usize>) -> Vec<DiseaseCount> {
    let mut counts: BTreeMap<Option<&str>, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.diagnosis_description.as_deref()).or_default() += 1;
    }

    let mut output: Vec<DiseaseCount> = counts
        .into_iter()
        .map(|(disease, count)| DiseaseCount {
            disease: disease.map(String::from),
            count,
        })
        .collect();
    // ties keep the key order from the map
    output.sort_by_key(|row| Reverse(row.count));
    if let Some(limit) = limit {
        output.truncate(limit);
    }
    output
}

pub fn age_group(age: Option<i32>) -> &'static str {
    match age {
        Some(30..=40) => "30-40",
        Some(41..=50) => "41-50",
        Some(51..=60) => "51-60",
        Some(61..=70) => "61-70",
        Some(71..) => "70+",
        _ => "minors",
    }
}

pub fn age_category(records: &[PatientRecord]) -> Vec<AgeCategoryCount> {
    let mut counts: BTreeMap<(&str, Option<&str>, Option<&str>), usize> = BTreeMap::new();
    for record in records {
        let key = (
            age_group(record.age),
            record.diagnosis_description.as_deref(),
            record.diagnosis_code.as_deref(),
        );
        *counts.entry(key).or_default() += 1;
    }

    let mut output: Vec<AgeCategoryCount> = counts
        .into_iter()
        .map(|((group, description, code), count)| AgeCategoryCount {
            age_group: group.to_string(),
            diagnosis_description: description.map(String::from),
            diagnosis_code: code.map(String::from),
            count,
        })
        .collect();
    output.sort_by(|a, b| a.age_group.cmp(&b.age_group).then(b.count.cmp(&a.count)));
    output
}

pub fn senior_citizen_flag(records: &[PatientRecord]) -> Vec<SeniorCitizenFlag> {
    let mut output: Vec<SeniorCitizenFlag> = records
        .iter()
        .map(|record| SeniorCitizenFlag {
            patient_id: record.patient_id.clone(),
            age: record.age,
            gender: record.gender.clone(),
            diagnosis_description: record.diagnosis_description.clone(),
            senior_citizen_flag: if record.age.is_some_and(|age| age >= SENIOR_AGE) {
                "Y".into()
            } else {
                "N".into()
            },
        })
        .collect();
    // Reverse(None) sorts after every Reverse(Some(_)), so unknown ages go last
    output.sort_by_key(|row| Reverse(row.age));
    output
}

/// Diagnoses per day of week, 1 = Sunday through 7 = Saturday.
pub fn disease_trend_over_the_week(records: &[PatientRecord]) -> Vec<WeekdayTrend> {
    let mut counts: BTreeMap<(Option<u32>, Option<&str>), usize> = BTreeMap::new();
    for record in records {
        let day = record
            .diagnosis_date
            .map(|date| date.weekday().number_from_sunday());
        *counts
            .entry((day, record.diagnosis_description.as_deref()))
            .or_default() += 1;
    }

    let mut output: Vec<WeekdayTrend> = counts
        .into_iter()
        .map(|((day, description), count)| WeekdayTrend {
            diagnosis_description: description.map(String::from),
            dayofweek: day,
            count,
        })
        .collect();
    output.sort_by_key(|row| Reverse(row.count));
    output
}

pub struct DiseaseGenderRatio;
pub struct MostCommonDiseases {
    pub limit: Option<usize>,
}
pub struct AgeCategory;
pub struct SeniorCitizens;
pub struct WeeklyTrend;

impl Aggregation for DiseaseGenderRatio {
    fn collection(&self) -> &'static str {
        "disease_gender_ratio_data"
    }

    fn compute(&self, records: &[PatientRecord]) -> Result<Vec<Value>> {
        to_documents(&disease_gender_ratio(records))
    }
}

impl Aggregation for MostCommonDiseases {
    fn collection(&self) -> &'static str {
        "most_common_diseases_data"
    }

    fn compute(&self, records: &[PatientRecord]) -> Result<Vec<Value>> {
        to_documents(&most_common_diseases(records, self.limit))
    }
}

impl Aggregation for AgeCategory {
    fn collection(&self) -> &'static str {
        "age_category_data"
    }

    fn compute(&self, records: &[PatientRecord]) -> Result<Vec<Value>> {
        to_documents(&age_category(records))
    }
}

impl Aggregation for SeniorCitizens {
    fn collection(&self) -> &'static str {
        "senior_citizen_flag_data"
    }

    fn compute(&self, records: &[PatientRecord]) -> Result<Vec<Value>> {
        to_documents(&senior_citizen_flag(records))
    }
}

impl Aggregation for WeeklyTrend {
    fn collection(&self) -> &'static str {
        "disease_trend_over_the_week_data"
    }

    fn compute(&self, records: &[PatientRecord]) -> Result<Vec<Value>> {
        to_documents(&disease_trend_over_the_week(records))
    }
}

/// The aggregates computed over the day's cleaned records, in run order.
pub fn daily_aggregations(top: Option<usize>) -> Vec<Box<dyn Aggregation>> {
    vec![
        Box::new(DiseaseGenderRatio),
        Box::new(MostCommonDiseases { limit: top }),
        Box::new(AgeCategory),
        Box::new(SeniorCitizens),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn record(id: &str, age: Option<i32>, gender: &str, code: &str, description: &str) -> PatientRecord {
        PatientRecord {
            patient_id: Some(id.into()),
            age,
            gender: Some(gender.into()),
            diagnosis_code: Some(code.into()),
            diagnosis_description: Some(description.into()),
            diagnosis_date: NaiveDate::from_ymd_opt(2024, 1, 5),
        }
    }

    fn sample() -> Vec<PatientRecord> {
        vec![
            record("P1", Some(35), "M", "D123", "Diabetes"),
            record("P2", Some(62), "F", "D123", "Diabetes"),
            record("P3", Some(45), "F", "D123", "Diabetes"),
            record("P4", Some(71), "M", "H234", "High Blood Pressure"),
            record("P5", None, "M", "H234", "High Blood Pressure"),
            record("P6", Some(12), "M", "C345", "Cancer"),
            record("P7", Some(60), "F", "C345", "Cancer"),
            record("P8", Some(36), "M", "D123", "Diabetes"),
            record("P9", Some(38), "M", "C345", "Cancer"),
        ]
    }

    #[test]
    fn gender_ratio_per_code() {
        let ratios = disease_gender_ratio(&sample());
        assert_eq!(
            ratios,
            vec![
                GenderRatio { diagnosis_code: Some("C345".into()), ratio: Some(2.0) },
                GenderRatio { diagnosis_code: Some("D123".into()), ratio: Some(1.0) },
                GenderRatio { diagnosis_code: Some("H234".into()), ratio: None },
            ]
        );
    }

    #[test]
    fn gender_ratio_rounds_to_two_places() {
        let records = vec![
            record("P1", Some(40), "M", "X1", "X"),
            record("P2", Some(40), "F", "X1", "X"),
            record("P3", Some(40), "F", "X1", "X"),
            record("P4", Some(40), "F", "X1", "X"),
        ];
        assert_eq!(disease_gender_ratio(&records)[0].ratio, Some(0.33));
    }

    #[test]
    fn gender_ratio_rounds_decimal_halves_up() {
        assert_eq!(round2(201.0 / 200.0), 1.01);
        assert_eq!(round2(2.675), 2.68);
        assert_eq!(round2(0.125), 0.13);
    }

    #[test]
    fn null_keys_sort_first_among_ties() {
        let mut records = vec![
            record("P1", Some(40), "M", "B1", "Beta"),
            record("P2", Some(40), "F", "A1", "Alpha"),
            record("P3", Some(40), "F", "B1", "Beta"),
            record("P4", Some(40), "M", "A1", "Alpha"),
        ];
        let mut unknown = record("P5", Some(40), "M", "Z", "Z");
        unknown.diagnosis_code = None;
        unknown.diagnosis_description = None;
        unknown.diagnosis_date = None;
        records.push(unknown.clone());
        records.push(unknown);

        let codes: Vec<Option<String>> = disease_gender_ratio(&records)
            .into_iter()
            .map(|row| row.diagnosis_code)
            .collect();
        assert_eq!(codes, vec![None, Some("A1".to_string()), Some("B1".to_string())]);

        let diseases: Vec<Option<String>> = most_common_diseases(&records, None)
            .into_iter()
            .map(|row| row.disease)
            .collect();
        assert_eq!(
            diseases,
            vec![None, Some("Alpha".to_string()), Some("Beta".to_string())]
        );

        let days: Vec<(Option<u32>, Option<String>)> = disease_trend_over_the_week(&records)
            .into_iter()
            .map(|row| (row.dayofweek, row.diagnosis_description))
            .collect();
        assert_eq!(
            days,
            vec![
                (None, None),
                (Some(6), Some("Alpha".to_string())),
                (Some(6), Some("Beta".to_string())),
            ]
        );
    }

    #[test]
    fn most_common_sorted_by_count() {
        let counts = most_common_diseases(&sample(), None);
        let ordered: Vec<(&str, usize)> = counts
            .iter()
            .map(|row| (row.disease.as_deref().unwrap_or_default(), row.count))
            .collect();
        assert_eq!(
            ordered,
            vec![("Diabetes", 4), ("Cancer", 3), ("High Blood Pressure", 2)]
        );
        assert_eq!(most_common_diseases(&sample(), Some(1)).len(), 1);
    }

    #[rstest]
    #[case(Some(30), "30-40")]
    #[case(Some(40), "30-40")]
    #[case(Some(41), "41-50")]
    #[case(Some(60), "51-60")]
    #[case(Some(70), "61-70")]
    #[case(Some(71), "70+")]
    #[case(Some(29), "minors")]
    #[case(None, "minors")]
    fn age_buckets(#[case] age: Option<i32>, #[case] expected: &str) {
        assert_eq!(age_group(age), expected);
    }

    #[test]
    fn age_category_orders_groups_then_count() {
        let rows = age_category(&sample());
        assert_eq!(rows[0].age_group, "30-40");
        assert_eq!(rows[0].diagnosis_description.as_deref(), Some("Diabetes"));
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[1].diagnosis_description.as_deref(), Some("Cancer"));
        assert_eq!(rows[1].count, 1);
        let groups: Vec<&str> = rows.iter().map(|row| row.age_group.as_str()).collect();
        assert_eq!(groups, vec!["30-40", "30-40", "41-50", "51-60", "61-70", "70+", "minors", "minors"]);
    }

    #[test]
    fn senior_flag_sorted_by_age_desc() {
        let rows = senior_citizen_flag(&sample());
        assert_eq!(rows[0].patient_id.as_deref(), Some("P4"));
        assert_eq!(rows[0].senior_citizen_flag, "Y");
        assert_eq!(rows[2].age, Some(60));
        assert_eq!(rows[2].senior_citizen_flag, "Y");
        assert_eq!(rows[3].senior_citizen_flag, "N");
        let last = rows.last().unwrap();
        assert_eq!(last.patient_id.as_deref(), Some("P5"));
        assert_eq!(last.senior_citizen_flag, "N");
    }

    #[test]
    fn weekly_trend_uses_sunday_as_day_one() {
        let mut records = sample();
        records[0].diagnosis_date = NaiveDate::from_ymd_opt(2024, 1, 7);
        records[1].diagnosis_date = None;
        let rows = disease_trend_over_the_week(&records);

        // 2024-01-05 is a Friday
        assert_eq!(
            rows[0],
            WeekdayTrend {
                diagnosis_description: Some("Cancer".into()),
                dayofweek: Some(6),
                count: 3,
            }
        );
        assert!(rows.contains(&WeekdayTrend {
            diagnosis_description: Some("Diabetes".into()),
            dayofweek: Some(1),
            count: 1,
        }));
        assert!(rows.contains(&WeekdayTrend {
            diagnosis_description: Some("Diabetes".into()),
            dayofweek: None,
            count: 1,
        }));
    }

    #[test]
    fn aggregations_render_documents() {
        let documents = DiseaseGenderRatio.compute(&sample()).unwrap();
        assert_eq!(documents[0], json!({"diagnosis_code": "C345", "ratio": 2.0}));
        assert_eq!(documents[2], json!({"diagnosis_code": "H234", "ratio": null}));

        let names: Vec<&str> = daily_aggregations(None).iter().map(|agg| agg.collection()).collect();
        assert_eq!(
            names,
            vec![
                "disease_gender_ratio_data",
                "most_common_diseases_data",
                "age_category_data",
                "senior_citizen_flag_data",
            ]
        );
        assert_eq!(WeeklyTrend.collection(), "disease_trend_over_the_week_data");
    }
}
