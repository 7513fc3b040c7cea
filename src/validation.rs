//! Per-field validation rules and whole-record validation of student data.

use std::collections::BTreeMap;

use crate::config::limits::{
    AGE_MAX, AGE_MIN, GRADE_MAX, GRADE_MIN, MAX_CUSTOM_PROMPT_LENGTH, MAX_FIELD_LENGTH,
};
use crate::error::AppError;
use crate::profile::{
    is_categorical, FieldMap, StudentProfile, CATEGORICAL_FIELDS, CUSTOM_PROMPT_FIELD,
    NUMERIC_FIELDS,
};

/// Field name -> error message, for annotating individual inputs.
pub type FieldErrors = BTreeMap<String, String>;

pub const REQUIRED_MESSAGE: &str = "This field is required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Short code-like text: ASCII alphanumerics and underscores only.
    Code,
    Integer { min: i64, max: i64 },
    /// Free text, may be empty.
    Prompt,
}

pub fn rule_for(field: &str) -> Option<FieldRule> {
    if is_categorical(field) {
        return Some(FieldRule::Code);
    }
    let (min, max) = match field {
        "age" => (AGE_MIN, AGE_MAX),
        "G1" | "G2" => (GRADE_MIN, GRADE_MAX),
        "Medu" | "Fedu" | "failures" => (0, 4),
        "traveltime" | "studytime" => (1, 4),
        "famrel" | "freetime" | "goout" | "Dalc" | "Walc" | "health" => (1, 5),
        "absences" => (0, 93),
        CUSTOM_PROMPT_FIELD => return Some(FieldRule::Prompt),
        _ => return None,
    };
    Some(FieldRule::Integer { min, max })
}

fn range_message(field: &str, min: i64, max: i64) -> String {
    match field {
        "age" => format!("Age must be between {min} and {max}"),
        "G1" | "G2" => format!("Grades must be between {min} and {max}"),
        _ => format!("Field '{field}' must be between {min} and {max}"),
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    // Form inputs sometimes arrive as "12.0".
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value.fract() == 0.0 => Some(value as i64),
        _ => None,
    }
}

fn check_code(field: &str, value: &str) -> Result<(), String> {
    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(format!(
            "Field '{field}' exceeds maximum length of {MAX_FIELD_LENGTH} characters"
        ));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("Field '{field}' contains invalid characters"));
    }
    Ok(())
}

fn check_prompt(value: &str) -> Result<(), String> {
    if value.chars().count() > MAX_CUSTOM_PROMPT_LENGTH {
        return Err(format!(
            "Custom prompt exceeds maximum length of {MAX_CUSTOM_PROMPT_LENGTH} characters"
        ));
    }
    Ok(())
}

/// Validate a single field value against its rule.
pub fn validate_field(field: &str, value: &str) -> Result<(), String> {
    let Some(rule) = rule_for(field) else {
        return Err(format!("Unknown field '{field}'"));
    };
    let value = value.trim();
    match rule {
        FieldRule::Prompt => check_prompt(value),
        _ if value.is_empty() => Err(format!("Field '{field}' cannot be empty")),
        FieldRule::Code => check_code(field, value),
        FieldRule::Integer { min, max } => {
            let number = parse_integer(value).ok_or_else(|| format!("Invalid numeric values: {field}"))?;
            if number < min || number > max {
                return Err(range_message(field, min, max));
            }
            Ok(())
        }
    }
}

/// Validate a subset of fields, collecting one message per failing field.
pub fn validate_fields<'a, I>(names: I, fields: &FieldMap) -> FieldErrors
where
    I: IntoIterator<Item = &'a str>,
{
    let mut errors = FieldErrors::new();
    for name in names {
        let required = name != CUSTOM_PROMPT_FIELD;
        match fields.get(name) {
            Some(value) if !value.trim().is_empty() || !required => {
                if let Err(message) = validate_field(name, value) {
                    errors.insert(name.to_string(), message);
                }
            }
            _ if required => {
                errors.insert(name.to_string(), REQUIRED_MESSAGE.to_string());
            }
            _ => {}
        }
    }
    errors
}

/// Range checks for these fields run before the remaining numeric fields.
const RANGE_CHECKED_FIRST: [&str; 3] = ["age", "G1", "G2"];

/// Validate a complete submission and build the profile from it.
///
/// Checks run in a fixed order (presence, emptiness, text rules, numeric
/// parsing, ranges, custom prompt) and the first failing check is reported.
/// Ranges are checked for age, then grades, then everything else.
pub fn validate_student_data(fields: &FieldMap) -> Result<StudentProfile, AppError> {
    if fields.is_empty() {
        return Err(AppError::Validation(
            crate::config::messages::NO_STUDENT_DATA.to_string(),
        ));
    }

    let required: Vec<&str> = CATEGORICAL_FIELDS
        .iter()
        .chain(NUMERIC_FIELDS.iter())
        .copied()
        .collect();

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| !fields.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    for name in &required {
        if fields[*name].trim().is_empty() {
            return Err(AppError::Validation(format!("Field '{name}' cannot be empty")));
        }
    }

    for name in CATEGORICAL_FIELDS {
        check_code(name, fields[name].trim()).map_err(AppError::Validation)?;
    }

    let mut numbers = BTreeMap::new();
    let mut unparsable = Vec::new();
    for name in NUMERIC_FIELDS {
        match parse_integer(&fields[name]) {
            Some(value) => {
                numbers.insert(name, value);
            }
            None => unparsable.push(name),
        }
    }
    if !unparsable.is_empty() {
        return Err(AppError::Validation(format!(
            "Invalid numeric values: {}",
            unparsable.join(", ")
        )));
    }

    let range_order = RANGE_CHECKED_FIRST.iter().copied().chain(
        NUMERIC_FIELDS
            .iter()
            .copied()
            .filter(|name| !RANGE_CHECKED_FIRST.contains(name)),
    );
    for name in range_order {
        if let Some(FieldRule::Integer { min, max }) = rule_for(name) {
            let value = numbers[name];
            if value < min || value > max {
                return Err(AppError::Validation(range_message(name, min, max)));
            }
        }
    }

    let custom_prompt = match fields.get(CUSTOM_PROMPT_FIELD).map(|p| p.trim()) {
        Some(prompt) if !prompt.is_empty() => {
            check_prompt(prompt).map_err(AppError::Validation)?;
            Some(prompt.to_string())
        }
        _ => None,
    };

    let text = |name: &str| fields[name].trim().to_string();
    // Ranges above guarantee every value is non-negative and small.
    let num = |name: &str| numbers[name] as u32;

    let mut profile = StudentProfile {
        school: text("school"),
        sex: text("sex"),
        age: num("age"),
        address: text("address"),
        famsize: text("famsize"),
        pstatus: text("Pstatus"),
        medu: num("Medu"),
        fedu: num("Fedu"),
        mjob: text("Mjob"),
        fjob: text("Fjob"),
        reason: text("reason"),
        guardian: text("guardian"),
        traveltime: num("traveltime"),
        studytime: num("studytime"),
        failures: num("failures"),
        schoolsup: text("schoolsup"),
        famsup: text("famsup"),
        paid: text("paid"),
        activities: text("activities"),
        nursery: text("nursery"),
        higher: text("higher"),
        internet: text("internet"),
        romantic: text("romantic"),
        famrel: num("famrel"),
        freetime: num("freetime"),
        goout: num("goout"),
        dalc: num("Dalc"),
        walc: num("Walc"),
        health: num("health"),
        absences: num("absences"),
        g1: num("G1"),
        g2: num("G2"),
        average_grade: 0.0,
        grade_change: 0.0,
        custom_prompt,
    };
    profile.refresh_derived();
    Ok(profile)
}
