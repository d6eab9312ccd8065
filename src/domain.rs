use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(ExperimentId);
string_id!(ProjectId);
string_id!(SubjectId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub experiment_id: ExperimentId,
    pub project_id: ProjectId,
    pub subject_id: SubjectId,
    pub subject_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Investigator {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

pub const UNKNOWN_INVESTIGATOR: &str = "UNKNOWN";

impl Investigator {
    pub fn archive_name(&self) -> &str {
        match self.last_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => UNKNOWN_INVESTIGATOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRef {
    pub experiment_id: ExperimentId,
    pub scan_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub scan: ScanRef,
    pub resource_id: String,
    pub label: Option<String>,
    pub file_count: u64,
    pub file_size: u64,
}

impl ResourceRef {
    // XNAT accepts labels as well as numeric ids here.
    pub fn path_segment(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.resource_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub resource: ResourceRef,
    pub name: String,
}

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeKeys(Vec<String>);

impl Default for SizeKeys {
    fn default() -> Self {
        Self(
            ["Size", "size", "FileSize", "length", "bytes"]
                .iter()
                .map(|key| key.to_string())
                .collect(),
        )
    }
}

impl SizeKeys {
    pub fn new(keys: Vec<String>) -> Self {
        if keys.is_empty() {
            return Self::default();
        }
        Self(keys)
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn extract(&self, attributes: &Attributes) -> u64 {
        self.0
            .iter()
            .filter_map(|key| attributes.get(key))
            .find(|value| !is_empty_value(value))
            .map(value_as_u64)
            .unwrap_or(0)
    }
}

// Null, blank and zero values leave the lookup to the next key.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Number(number) => number.as_f64() == Some(0.0),
        _ => false,
    }
}

pub fn value_as_u64(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v as u64)
            })
            .unwrap_or(0),
        Value::String(text) => text.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}
