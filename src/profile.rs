//! The student profile record and the assessment result returned for it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::charts::ChartSet;

/// Raw form values keyed by field name, as gathered from a form or a JSON body.
pub type FieldMap = BTreeMap<String, String>;

pub const CUSTOM_PROMPT_FIELD: &str = "customPrompt";

pub const CATEGORICAL_FIELDS: [&str; 17] = [
    "school", "sex", "address", "famsize", "Pstatus", "Mjob", "Fjob", "reason", "guardian",
    "schoolsup", "famsup", "paid", "activities", "nursery", "higher", "internet", "romantic",
];

pub const NUMERIC_FIELDS: [&str; 15] = [
    "age", "Medu", "Fedu", "traveltime", "studytime", "failures", "famrel", "freetime", "goout",
    "Dalc", "Walc", "health", "absences", "G1", "G2",
];

pub const DERIVED_FIELDS: [&str; 2] = ["average_grade", "grade_change"];

/// Model input columns, in the order the feature matrix is built.
pub const FEATURE_COLUMNS: [&str; 34] = [
    "school", "sex", "age", "address", "famsize", "Pstatus", "Medu", "Fedu", "Mjob", "Fjob",
    "reason", "guardian", "traveltime", "studytime", "failures", "schoolsup", "famsup", "paid",
    "activities", "nursery", "higher", "internet", "romantic", "famrel", "freetime", "goout",
    "Dalc", "Walc", "health", "absences", "G1", "G2", "average_grade", "grade_change",
];

pub fn is_categorical(field: &str) -> bool {
    CATEGORICAL_FIELDS.contains(&field)
}

/// Human-readable label for a feature column.
pub fn display_name(column: &str) -> &'static str {
    match column {
        "school" => "School",
        "sex" => "Sex",
        "age" => "Age",
        "address" => "Home Address Type",
        "famsize" => "Family Size",
        "Pstatus" => "Parents' Cohabitation",
        "Medu" => "Mother's Education",
        "Fedu" => "Father's Education",
        "Mjob" => "Mother's Job",
        "Fjob" => "Father's Job",
        "reason" => "Reason for School Choice",
        "guardian" => "Guardian",
        "traveltime" => "Travel Time",
        "studytime" => "Study Time",
        "failures" => "Failures (Past)",
        "schoolsup" => "School Support",
        "famsup" => "Family Support",
        "paid" => "Paid Classes",
        "activities" => "Extracurricular Activities",
        "nursery" => "Attended Nursery",
        "higher" => "Wants Higher Education",
        "internet" => "Internet Access",
        "romantic" => "Romantic Relationship",
        "famrel" => "Family Relationships",
        "freetime" => "Free Time",
        "goout" => "Going Out",
        "Dalc" => "Weekday Alcohol",
        "Walc" => "Weekend Alcohol",
        "health" => "Health",
        "absences" => "Absences",
        "G1" => "G1 (First Grade)",
        "G2" => "G2 (Second Grade)",
        "average_grade" => "Average Grade",
        "grade_change" => "Grade Change",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub school: String,
    pub sex: String,
    pub age: u32,
    pub address: String,
    pub famsize: String,
    #[serde(rename = "Pstatus")]
    pub pstatus: String,
    #[serde(rename = "Medu")]
    pub medu: u32,
    #[serde(rename = "Fedu")]
    pub fedu: u32,
    #[serde(rename = "Mjob")]
    pub mjob: String,
    #[serde(rename = "Fjob")]
    pub fjob: String,
    pub reason: String,
    pub guardian: String,
    pub traveltime: u32,
    pub studytime: u32,
    pub failures: u32,
    pub schoolsup: String,
    pub famsup: String,
    pub paid: String,
    pub activities: String,
    pub nursery: String,
    pub higher: String,
    pub internet: String,
    pub romantic: String,
    pub famrel: u32,
    pub freetime: u32,
    pub goout: u32,
    #[serde(rename = "Dalc")]
    pub dalc: u32,
    #[serde(rename = "Walc")]
    pub walc: u32,
    pub health: u32,
    pub absences: u32,
    #[serde(rename = "G1")]
    pub g1: u32,
    #[serde(rename = "G2")]
    pub g2: u32,
    pub average_grade: f64,
    pub grade_change: f64,
    #[serde(
        rename = "customPrompt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_prompt: Option<String>,
}

impl StudentProfile {
    /// Recompute `average_grade` and `grade_change` from G1 and G2.
    pub fn refresh_derived(&mut self) {
        self.average_grade = (self.g1 as f64 + self.g2 as f64) / 2.0;
        self.grade_change = self.g2 as f64 - self.g1 as f64;
    }

    pub fn categorical(&self, field: &str) -> Option<&str> {
        let value = match field {
            "school" => &self.school,
            "sex" => &self.sex,
            "address" => &self.address,
            "famsize" => &self.famsize,
            "Pstatus" => &self.pstatus,
            "Mjob" => &self.mjob,
            "Fjob" => &self.fjob,
            "reason" => &self.reason,
            "guardian" => &self.guardian,
            "schoolsup" => &self.schoolsup,
            "famsup" => &self.famsup,
            "paid" => &self.paid,
            "activities" => &self.activities,
            "nursery" => &self.nursery,
            "higher" => &self.higher,
            "internet" => &self.internet,
            "romantic" => &self.romantic,
            _ => return None,
        };
        Some(value.as_str())
    }

    pub fn numeric(&self, field: &str) -> Option<f64> {
        let value = match field {
            "age" => self.age,
            "Medu" => self.medu,
            "Fedu" => self.fedu,
            "traveltime" => self.traveltime,
            "studytime" => self.studytime,
            "failures" => self.failures,
            "famrel" => self.famrel,
            "freetime" => self.freetime,
            "goout" => self.goout,
            "Dalc" => self.dalc,
            "Walc" => self.walc,
            "health" => self.health,
            "absences" => self.absences,
            "G1" => self.g1,
            "G2" => self.g2,
            "average_grade" => return Some(self.average_grade),
            "grade_change" => return Some(self.grade_change),
            _ => return None,
        };
        Some(value as f64)
    }

    /// Flatten back into raw form values; the inverse of validation.
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        for name in CATEGORICAL_FIELDS {
            if let Some(value) = self.categorical(name) {
                fields.insert(name.to_string(), value.to_string());
            }
        }
        for name in NUMERIC_FIELDS {
            if let Some(value) = self.numeric(name) {
                fields.insert(name.to_string(), format!("{}", value as u32));
            }
        }
        if let Some(prompt) = &self.custom_prompt {
            fields.insert(CUSTOM_PROMPT_FIELD.to_string(), prompt.clone());
        }
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low];

    /// Risk label for a final grade (0-20).
    pub fn from_final_grade(g3: u32) -> Self {
        match g3 {
            0..=9 => RiskLevel::High,
            10..=13 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn index(self) -> usize {
        match self {
            RiskLevel::High => 0,
            RiskLevel::Medium => 1,
            RiskLevel::Low => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }

    /// Representative final grade shown for the class.
    pub fn estimated_grade(self) -> u32 {
        match self {
            RiskLevel::High => 8,
            RiskLevel::Medium => 12,
            RiskLevel::Low => 16,
        }
    }

    pub fn descriptor(self) -> &'static str {
        match self {
            RiskLevel::High => "Requires immediate intervention and support.",
            RiskLevel::Medium => "Needs focused attention to improve academic trajectory.",
            RiskLevel::Low => "On track, but minor improvements can maximize potential.",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(RiskLevel::High),
            "medium" => Ok(RiskLevel::Medium),
            "low" => Ok(RiskLevel::Low),
            other => Err(format!("Unknown risk category '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Probabilities {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Probabilities {
    pub fn get(&self, level: RiskLevel) -> f64 {
        match level {
            RiskLevel::High => self.high,
            RiskLevel::Medium => self.medium,
            RiskLevel::Low => self.low,
        }
    }

    pub fn set(&mut self, level: RiskLevel, value: f64) {
        match level {
            RiskLevel::High => self.high = value,
            RiskLevel::Medium => self.medium = value,
            RiskLevel::Low => self.low = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub prediction: u32,
    pub risk_category: RiskLevel,
    pub risk_descriptor: String,
    pub confidence: f64,
    pub probabilities: Probabilities,
    pub shap_values: Vec<FeatureContribution>,
    pub mentoring_advice: String,
    #[serde(default)]
    pub advice_html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charts: Option<ChartSet>,
    #[serde(default = "success_status")]
    pub status: String,
}

fn success_status() -> String {
    "success".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_grade_thresholds() {
        assert_eq!(RiskLevel::from_final_grade(9), RiskLevel::High);
        assert_eq!(RiskLevel::from_final_grade(10), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_final_grade(13), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_final_grade(14), RiskLevel::Low);
    }

    #[test]
    fn feature_columns_cover_every_input() {
        for field in CATEGORICAL_FIELDS.iter().chain(NUMERIC_FIELDS.iter()) {
            assert!(FEATURE_COLUMNS.contains(field), "{field} missing");
        }
        for field in DERIVED_FIELDS {
            assert!(FEATURE_COLUMNS.contains(&field));
        }
        for column in FEATURE_COLUMNS {
            assert_ne!(display_name(column), "Unknown");
        }
    }

    #[test]
    fn risk_level_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!("severe".parse::<RiskLevel>().is_err());
    }
}
