use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stage of the stock an entry counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// raw material
    Raw,
    /// semi-finished goods
    Sfg,
    /// finished goods
    Fg,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Raw => "raw",
            EntryType::Sfg => "sfg",
            EntryType::Fg => "fg",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = EntryTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(EntryType::Raw),
            "sfg" => Ok(EntryType::Sfg),
            "fg" => Ok(EntryType::Fg),
            _ => Err(EntryTypeError::Unknown(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum EntryTypeError {
    #[error("unknown entry type: {0} (expected raw/sfg/fg)")]
    Unknown(String),
}
