use serde::{Deserialize, Serialize};
use std::fmt;

/// Column types a staged dataset can carry into BigQuery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum BqType {
    String,
    Int64,
    Float64,
    Numeric,
    Bool,
    Date,
    Timestamp,
}

impl BqType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            BqType::String => "STRING",
            BqType::Int64 => "INT64",
            BqType::Float64 => "FLOAT64",
            BqType::Numeric => "NUMERIC",
            BqType::Bool => "BOOL",
            BqType::Date => "DATE",
            BqType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for BqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: BqType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: BqType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}
