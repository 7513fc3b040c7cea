//! Multi-section form state: gather, populate, clear and validate.

use serde_json::Value;

use crate::error::AppError;
use crate::profile::{FieldMap, StudentProfile, CUSTOM_PROMPT_FIELD};
use crate::validation::{validate_fields, validate_student_data, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub title: &'static str,
    pub fields: &'static [&'static str],
}

pub const SECTIONS: [Section; 3] = [
    Section {
        title: "Demographics & Family",
        fields: &[
            "school", "sex", "age", "address", "famsize", "Pstatus", "Medu", "Fedu", "Mjob",
            "Fjob", "guardian",
        ],
    },
    Section {
        title: "Academic",
        fields: &[
            "reason", "traveltime", "studytime", "failures", "schoolsup", "famsup", "paid",
            "activities", "nursery", "higher", "internet", "absences", "G1", "G2",
        ],
    },
    Section {
        title: "Lifestyle & Wellbeing",
        fields: &[
            "romantic", "famrel", "freetime", "goout", "Dalc", "Walc", "health",
            CUSTOM_PROMPT_FIELD,
        ],
    },
];

/// Short prompt text for a field, used by the terminal wizard.
pub fn field_hint(field: &str) -> &'static str {
    match field {
        "school" => "School (GP or MS)",
        "sex" => "Sex (F or M)",
        "age" => "Age (15-30)",
        "address" => "Home address (U urban, R rural)",
        "famsize" => "Family size (LE3 or GT3)",
        "Pstatus" => "Parents' status (T together, A apart)",
        "Medu" => "Mother's education (0 none - 4 higher)",
        "Fedu" => "Father's education (0 none - 4 higher)",
        "Mjob" => "Mother's job (teacher, health, services, at_home, other)",
        "Fjob" => "Father's job (teacher, health, services, at_home, other)",
        "guardian" => "Guardian (mother, father, other)",
        "reason" => "Reason for choosing school (home, reputation, course, other)",
        "traveltime" => "Travel time (1 <15m, 2 15-30m, 3 30-60m, 4 >1h)",
        "studytime" => "Weekly study time (1 <2h, 2 2-5h, 3 5-10h, 4 >10h)",
        "failures" => "Past class failures (0-4)",
        "schoolsup" => "Extra school support (yes/no)",
        "famsup" => "Family educational support (yes/no)",
        "paid" => "Extra paid classes (yes/no)",
        "activities" => "Extracurricular activities (yes/no)",
        "nursery" => "Attended nursery school (yes/no)",
        "higher" => "Wants higher education (yes/no)",
        "internet" => "Internet access at home (yes/no)",
        "absences" => "School absences (0-93)",
        "G1" => "First period grade (0-20)",
        "G2" => "Second period grade (0-20)",
        "romantic" => "In a romantic relationship (yes/no)",
        "famrel" => "Family relationship quality (1-5)",
        "freetime" => "Free time after school (1-5)",
        "goout" => "Going out with friends (1-5)",
        "Dalc" => "Weekday alcohol consumption (1-5)",
        "Walc" => "Weekend alcohol consumption (1-5)",
        "health" => "Current health status (1-5)",
        CUSTOM_PROMPT_FIELD => "Anything specific the mentor should address? (optional)",
        _ => "",
    }
}

/// Convert a JSON object into raw form values. Numbers and booleans are
/// stringified; nulls are dropped. A `student_data` wrapper is unwrapped.
pub fn fields_from_json(body: &Value) -> Result<FieldMap, AppError> {
    let object = match body.get("student_data") {
        Some(inner) => inner,
        None => body,
    };
    let Some(object) = object.as_object() else {
        return Err(AppError::Validation(
            "Request body must be a JSON object".to_string(),
        ));
    };

    let mut fields = FieldMap::new();
    for (key, value) in object {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => (if *b { "yes" } else { "no" }).to_string(),
            _ => {
                return Err(AppError::Validation(format!(
                    "Field '{key}' must be a string or number"
                )))
            }
        };
        fields.insert(key.clone(), text);
    }
    Ok(fields)
}

#[derive(Debug, Clone, Default)]
pub struct FormState {
    fields: FieldMap,
    dirty: bool,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: FieldMap) -> Self {
        Self { fields, dirty: false }
    }

    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        let value = value.into();
        if self.fields.get(field) != Some(&value) {
            self.fields.insert(field.to_string(), value);
            self.dirty = true;
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Fill every input from a saved profile.
    pub fn populate(&mut self, profile: &StudentProfile) {
        self.fields = profile.to_fields();
        self.dirty = false;
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.dirty = false;
    }

    pub fn validate_section(&self, section: &Section) -> FieldErrors {
        validate_fields(section.fields.iter().copied(), &self.fields)
    }

    /// Validate everything and produce the profile.
    pub fn gather(&self) -> Result<StudentProfile, AppError> {
        validate_student_data(&self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CATEGORICAL_FIELDS, NUMERIC_FIELDS};
    use crate::validation::tests::sample_fields;
    use serde_json::json;

    #[test]
    fn every_field_belongs_to_exactly_one_section() {
        for field in CATEGORICAL_FIELDS.iter().chain(NUMERIC_FIELDS.iter()) {
            let owners = SECTIONS
                .iter()
                .filter(|section| section.fields.contains(field))
                .count();
            assert_eq!(owners, 1, "{field}");
            assert!(!field_hint(field).is_empty());
        }
    }

    #[test]
    fn json_numbers_and_wrappers_are_accepted() {
        let body = json!({"student_data": {"age": 17, "school": "GP", "note": null}});
        let fields = fields_from_json(&body).unwrap();
        assert_eq!(fields["age"], "17");
        assert_eq!(fields["school"], "GP");
        assert!(!fields.contains_key("note"));
    }

    #[test]
    fn nested_values_are_rejected() {
        let body = json!({"age": [17]});
        assert!(fields_from_json(&body).is_err());
        assert!(fields_from_json(&json!("text")).is_err());
    }

    #[test]
    fn populate_round_trips_through_gather() {
        let profile = validate_student_data(&sample_fields()).unwrap();
        let mut form = FormState::new();
        form.populate(&profile);
        assert!(!form.is_dirty());
        assert_eq!(form.gather().unwrap(), profile);
    }

    #[test]
    fn edits_mark_the_form_dirty_and_clear_resets() {
        let mut form = FormState::from_fields(sample_fields());
        form.set("age", "18");
        assert!(!form.is_dirty());
        form.set("age", "19");
        assert!(form.is_dirty());
        form.clear();
        assert!(form.fields().is_empty());
        assert!(!form.is_dirty());
    }

    #[test]
    fn section_validation_only_checks_its_fields() {
        let mut fields = sample_fields();
        fields.insert("G1".into(), "99".into());
        let form = FormState::from_fields(fields);
        assert!(form.validate_section(&SECTIONS[0]).is_empty());
        assert!(form.validate_section(&SECTIONS[1]).contains_key("G1"));
    }
}
