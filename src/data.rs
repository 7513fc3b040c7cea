use std::collections::BTreeMap;
use std::path::Path;

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::profile::{FieldMap, RiskLevel, StudentProfile};
use crate::validation::validate_student_data;

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Failed to read dataset: {0}")]
    Csv(#[from] csv::Error),
    #[error("Row {row}: {message}")]
    InvalidRow { row: usize, message: String },
    #[error("Dataset contains no usable rows")]
    Empty,
}

/// One labelled student from the training data.
#[derive(Debug, Clone)]
pub struct LabelledStudent {
    pub profile: StudentProfile,
    pub final_grade: u32,
    pub risk: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeAverages {
    #[serde(rename = "G1")]
    pub g1: f64,
    #[serde(rename = "G2")]
    pub g2: f64,
}

/// Load the semicolon-separated student dataset (`school;sex;age;...;G3`).
pub fn load_data(path: &Path) -> Result<Vec<LabelledStudent>, DataError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    load_from_reader(file)
}

pub fn load_from_reader<R: std::io::Read>(reader: R) -> Result<Vec<LabelledStudent>, DataError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut students = Vec::new();
    for (index, result) in rdr.records().enumerate() {
        let record = result?;
        let row = index + 2;
        let mut fields: FieldMap = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        let final_grade = fields
            .remove("G3")
            .and_then(|g3| g3.parse::<u32>().ok())
            .ok_or_else(|| DataError::InvalidRow {
                row,
                message: "missing or invalid G3".to_string(),
            })?;
        let profile = validate_student_data(&fields).map_err(|err| DataError::InvalidRow {
            row,
            message: err.to_string(),
        })?;

        students.push(LabelledStudent {
            profile,
            final_grade,
            risk: RiskLevel::from_final_grade(final_grade),
        });
    }

    if students.is_empty() {
        return Err(DataError::Empty);
    }
    tracing::info!("Loaded {} student records", students.len());
    Ok(students)
}

pub fn grade_averages(students: &[LabelledStudent]) -> Option<GradeAverages> {
    if students.is_empty() {
        return None;
    }
    let n = students.len() as f64;
    Some(GradeAverages {
        g1: students.iter().map(|s| s.profile.g1 as f64).sum::<f64>() / n,
        g2: students.iter().map(|s| s.profile.g2 as f64).sum::<f64>() / n,
    })
}

pub fn class_distribution(students: &[LabelledStudent]) -> BTreeMap<RiskLevel, usize> {
    let mut counts = BTreeMap::new();
    for student in students {
        *counts.entry(student.risk).or_insert(0) += 1;
    }
    counts
}
