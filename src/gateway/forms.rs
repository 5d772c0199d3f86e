//! Form-encoded request bodies and their coercion into typed input
//!
//! Every field arrives as an optional string so that a missing field and a
//! malformed one are both reported as validation failures instead of a bare
//! extractor rejection. `profession` is accepted as an alias of `category`
//! for clients of the older route set.

use crate::common::{Error, FieldViolation, NewRecord, RecordRules, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct CreateForm {
    pub name: Option<String>,
    pub age: Option<String>,
    #[serde(alias = "profession")]
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryForm {
    pub id: Option<String>,
    #[serde(alias = "profession")]
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdForm {
    pub id: Option<String>,
}

fn required(field: &str, value: Option<&str>) -> std::result::Result<String, FieldViolation> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(FieldViolation::new(field, "is required")),
    }
}

fn finish<T>(value: Option<T>, violations: Vec<FieldViolation>) -> Result<T> {
    match value {
        Some(v) if violations.is_empty() => Ok(v),
        _ => Err(Error::Validation(violations)),
    }
}

impl CreateForm {
    /// Coerce and validate, reporting every bad field at once.
    pub fn into_record(self, rules: &RecordRules) -> Result<NewRecord> {
        let mut violations = Vec::new();

        let name = required("name", self.name.as_deref())
            .and_then(|n| rules.check_name(&n).map(|_| n))
            .map_err(|v| violations.push(v))
            .ok();

        let age = required("age", self.age.as_deref())
            .and_then(|a| {
                a.parse::<i32>()
                    .map_err(|_| FieldViolation::new("age", "must be an integer"))
            })
            .and_then(|a| rules.check_age(a).map(|_| a))
            .map_err(|v| violations.push(v))
            .ok();

        let category = required("category", self.category.as_deref())
            .and_then(|c| rules.check_category(&c).map(|_| c))
            .map_err(|v| violations.push(v))
            .ok();

        let fields = match (name, age, category) {
            (Some(n), Some(a), Some(c)) => Some(NewRecord::new(n, a, c)),
            _ => None,
        };
        finish(fields, violations)
    }
}

impl CategoryForm {
    /// Category from the body; the id comes from the path when present.
    pub fn into_update(
        self,
        path_id: Option<String>,
        rules: &RecordRules,
    ) -> Result<(String, String)> {
        let mut violations = Vec::new();
        let id = required("id", path_id.as_deref().or(self.id.as_deref()))
            .map_err(|v| violations.push(v))
            .ok();
        let category = required("category", self.category.as_deref())
            .and_then(|c| rules.check_category(&c).map(|_| c))
            .map_err(|v| violations.push(v))
            .ok();
        finish(id.zip(category), violations)
    }
}

impl IdForm {
    pub fn into_id(self) -> Result<String> {
        required("id", self.id.as_deref()).map_err(|v| Error::Validation(vec![v]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, age: &str, category: &str) -> CreateForm {
        CreateForm {
            name: Some(name.into()),
            age: Some(age.into()),
            category: Some(category.into()),
        }
    }

    #[test]
    fn test_valid_form() {
        let rules = RecordRules::default();
        let record = form("Alice", "20", "Software Engineering")
            .into_record(&rules)
            .unwrap();
        assert_eq!(record, NewRecord::new("Alice", 20, "Software Engineering"));
    }

    #[test]
    fn test_every_bad_field_reported() {
        let rules = RecordRules::default();
        let err = form("1", "5", "X").into_record(&rules).unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["name", "age", "category"]);

        let err = CreateForm::default().into_record(&rules).unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["name", "age", "category"]);
    }

    #[test]
    fn test_non_numeric_age() {
        let rules = RecordRules::default();
        let err = form("Bob", "twenty", "Computer Science")
            .into_record(&rules)
            .unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["age"]);
    }

    #[test]
    fn test_path_id_wins() {
        let rules = RecordRules::default();
        let form = CategoryForm {
            id: Some("body".into()),
            category: Some("Computer Science".into()),
        };
        let (id, category) = form.into_update(Some("path".into()), &rules).unwrap();
        assert_eq!(id, "path");
        assert_eq!(category, "Computer Science");
    }

    #[test]
    fn test_blank_id_rejected() {
        let err = IdForm { id: Some("  ".into()) }.into_id().unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["id"]);
    }
}
