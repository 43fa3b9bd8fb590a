//! Transfer unit: one planned source to target copy
//!
//! Units are created during preparation, written once to the session data
//! log and never modified afterwards. Failures seen while copying travel on
//! status events, not in the stored unit.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::traits::ObjectInfo;

/// Kind of the source entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    File,
    Directory,
}

/// Source side of a transfer unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceContent {
    pub name: String,
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<Timestamp>,

    #[serde(default)]
    pub kind: SourceKind,
}

impl From<&ObjectInfo> for SourceContent {
    fn from(info: &ObjectInfo) -> Self {
        Self {
            name: info.name.clone(),
            size: info.size,
            modified: info.modified,
            kind: if info.is_dir {
                SourceKind::Directory
            } else {
                SourceKind::File
            },
        }
    }
}

/// One planned copy operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUnit {
    pub source: SourceContent,

    /// Target identifier; empty when preparation failed
    #[serde(default)]
    pub target: String,

    /// Set when the source could not be resolved; such a unit is never copied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferUnit {
    pub fn new(source: &ObjectInfo, target: impl Into<String>) -> Self {
        Self {
            source: SourceContent::from(source),
            target: target.into(),
            error: None,
        }
    }

    /// A unit recording that `spec` could not be resolved
    pub fn failed(spec: impl Into<String>, error: &Error) -> Self {
        Self {
            source: SourceContent {
                name: spec.into(),
                ..Default::default()
            },
            target: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Size in bytes of the source
    pub fn size(&self) -> u64 {
        self.source.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encoding() {
        let unit = TransferUnit::new(&ObjectInfo::file("src/a", 100), "T/a");
        let json = serde_json::to_string(&unit).unwrap();
        assert_eq!(
            json,
            r#"{"source":{"name":"src/a","size":100,"kind":"file"},"target":"T/a"}"#
        );
        let back: TransferUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, unit);
        assert!(back.is_ok());
    }

    #[test]
    fn test_failed_unit_carries_only_error() {
        let unit = TransferUnit::failed("missing...", &Error::NotFound("missing".into()));
        assert!(!unit.is_ok());
        assert!(unit.target.is_empty());
        assert_eq!(unit.size(), 0);
        assert_eq!(unit.error.as_deref(), Some("Not found: missing"));
    }

    #[test]
    fn test_directory_kind_from_listing() {
        let content = SourceContent::from(&ObjectInfo::dir("photos"));
        assert_eq!(content.kind, SourceKind::Directory);
    }
}
