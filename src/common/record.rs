//! Record model and field constraints
//!
//! Shared by the backend (authoritative validation inside the store) and the
//! gateway (early rejection before any discovery or RPC).

use crate::common::error::FieldViolation;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};

/// A stored student record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub category: String,
    /// Unix seconds, set once
    pub created_at: i64,
    /// Unix seconds, refreshed on every mutation
    pub modified_at: i64,
}

/// Caller-supplied fields for a new record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub name: String,
    pub age: i32,
    pub category: String,
}

impl NewRecord {
    pub fn new(name: impl Into<String>, age: i32, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age,
            category: category.into(),
        }
    }
}

/// A single-field mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Name(String),
    Age(i32),
    Category(String),
}

/// Character class accepted in record names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameCharset {
    /// `[A-Za-z]+`
    AsciiAlphabetic,
    /// `[A-Za-z0-9]+`
    AsciiAlphanumeric,
    /// Any alphabetic scalar, plus inner spaces
    Unicode,
}

impl NameCharset {
    fn accepts(&self, name: &str) -> bool {
        match self {
            NameCharset::AsciiAlphabetic => name.chars().all(|c| c.is_ascii_alphabetic()),
            NameCharset::AsciiAlphanumeric => name.chars().all(|c| c.is_ascii_alphanumeric()),
            NameCharset::Unicode => {
                name.trim() == name && name.chars().all(|c| c.is_alphabetic() || c == ' ')
            }
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            NameCharset::AsciiAlphabetic => "must contain only ASCII letters",
            NameCharset::AsciiAlphanumeric => "must contain only ASCII letters and digits",
            NameCharset::Unicode => "must contain only letters and inner spaces",
        }
    }
}

/// Domain constraints on record fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRules {
    #[serde(default = "default_charset")]
    pub name_charset: NameCharset,

    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    #[serde(default = "default_min_age")]
    pub min_age: i32,

    #[serde(default = "default_max_age")]
    pub max_age: i32,

    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

fn default_charset() -> NameCharset {
    NameCharset::AsciiAlphabetic
}
fn default_max_name_len() -> usize {
    64
}
fn default_min_age() -> i32 {
    10
}
fn default_max_age() -> i32 {
    100
}
fn default_categories() -> Vec<String> {
    vec![
        "Computer Science".to_string(),
        "Software Engineering".to_string(),
    ]
}

impl Default for RecordRules {
    fn default() -> Self {
        Self {
            name_charset: default_charset(),
            max_name_len: default_max_name_len(),
            min_age: default_min_age(),
            max_age: default_max_age(),
            categories: default_categories(),
        }
    }
}

impl RecordRules {
    /// Reject rule sets no record could ever satisfy.
    pub fn check(&self) -> Result<()> {
        if self.min_age > self.max_age {
            return Err(Error::InvalidConfig(format!(
                "min_age {} exceeds max_age {}",
                self.min_age, self.max_age
            )));
        }
        if self.categories.is_empty() {
            return Err(Error::InvalidConfig("categories cannot be empty".into()));
        }
        if self.max_name_len == 0 {
            return Err(Error::InvalidConfig("max_name_len must be positive".into()));
        }
        Ok(())
    }

    pub fn check_name(&self, name: &str) -> std::result::Result<(), FieldViolation> {
        if name.is_empty() {
            return Err(FieldViolation::new("name", "cannot be empty"));
        }
        if name.chars().count() > self.max_name_len {
            return Err(FieldViolation::new(
                "name",
                format!("longer than {} characters", self.max_name_len),
            ));
        }
        if !self.name_charset.accepts(name) {
            return Err(FieldViolation::new("name", self.name_charset.describe()));
        }
        Ok(())
    }

    pub fn check_age(&self, age: i32) -> std::result::Result<(), FieldViolation> {
        if age < self.min_age || age > self.max_age {
            return Err(FieldViolation::new(
                "age",
                format!("must be between {} and {}", self.min_age, self.max_age),
            ));
        }
        Ok(())
    }

    pub fn check_category(&self, category: &str) -> std::result::Result<(), FieldViolation> {
        if !self.categories.iter().any(|c| c == category) {
            return Err(FieldViolation::new(
                "category",
                format!("must be one of: {}", self.categories.join(", ")),
            ));
        }
        Ok(())
    }

    /// Validate every field, reporting all violations at once.
    pub fn validate(&self, fields: &NewRecord) -> Result<()> {
        let violations: Vec<FieldViolation> = [
            self.check_name(&fields.name),
            self.check_age(fields.age),
            self.check_category(&fields.category),
        ]
        .into_iter()
        .filter_map(|r| r.err())
        .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(violations))
        }
    }

    pub fn validate_update(&self, update: &FieldUpdate) -> Result<()> {
        let checked = match update {
            FieldUpdate::Name(name) => self.check_name(name),
            FieldUpdate::Age(age) => self.check_age(*age),
            FieldUpdate::Category(category) => self.check_category(category),
        };
        checked.map_err(|v| Error::Validation(vec![v]))
    }
}
