//! Path parsing and target naming
//!
//! Identifiers are either local filesystem paths or `alias/bucket/key`
//! remote paths. A trailing `...` on a source requests recursive expansion.

use std::fmt;

use crate::error::{Error, Result};

/// Suffix marking a recursive source
pub const RECURSIVE_MARKER: &str = "...";

/// A remote object location: alias/bucket/key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub alias: String,
    pub bucket: String,
    pub key: String,
}

impl RemotePath {
    pub fn new(alias: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Split `alias/bucket/key` into its parts. The key may be empty.
    pub fn parse(id: &str) -> Result<Self> {
        let mut parts = id.splitn(3, '/');
        let alias = parts.next().unwrap_or_default();
        let bucket = parts.next().unwrap_or_default();
        let key = parts.next().unwrap_or_default();

        if alias.is_empty() || bucket.is_empty() {
            return Err(Error::InvalidPath(format!(
                "'{id}' must have the form alias/bucket[/key]"
            )));
        }

        Ok(Self::new(alias, bucket, key))
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}/{}", self.alias, self.bucket)
        } else {
            write!(f, "{}/{}/{}", self.alias, self.bucket, self.key)
        }
    }
}

/// A user-supplied source with its recursive marker split off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Identifier without the marker
    pub root: String,
    pub recursive: bool,
}

impl SourceSpec {
    pub fn parse(spec: &str) -> Self {
        match spec.strip_suffix(RECURSIVE_MARKER) {
            Some(root) => {
                let trimmed = root.trim_end_matches('/');
                // "/..." keeps the filesystem root
                let root = if trimmed.is_empty() && root.starts_with('/') {
                    "/"
                } else if trimmed.is_empty() {
                    "."
                } else {
                    trimmed
                };
                Self {
                    root: root.to_string(),
                    recursive: true,
                }
            }
            None => Self {
                root: spec.to_string(),
                recursive: false,
            },
        }
    }
}

/// Check the argument list of a copy command: at least one source and a
/// non-recursive target as the last element.
pub fn validate_copy_args(args: &[String]) -> Result<()> {
    if args.len() < 2 {
        return Err(Error::InvalidPath(
            "copy needs at least one source and a target".to_string(),
        ));
    }

    let target = &args[args.len() - 1];
    if target.is_empty() {
        return Err(Error::InvalidPath("target cannot be empty".to_string()));
    }
    if target.ends_with(RECURSIVE_MARKER) {
        return Err(Error::InvalidPath(format!(
            "recursive marker is not allowed on target '{target}'"
        )));
    }
    if let Some(empty) = args[..args.len() - 1].iter().find(|s| s.is_empty()) {
        return Err(Error::InvalidPath(format!("invalid source '{empty}'")));
    }

    Ok(())
}

/// Join a base identifier with a relative path using `/`
pub fn join(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if base.is_empty() {
        return relative.to_string();
    }
    if relative.is_empty() {
        return base.to_string();
    }
    format!("{}/{relative}", base.trim_end_matches('/'))
}

/// Last path segment of an identifier
pub fn basename(id: &str) -> &str {
    let trimmed = id.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Path of `entry` relative to the recursive source `root`
pub fn relative_to<'a>(root: &str, entry: &'a str) -> &'a str {
    if root == "." {
        return entry.trim_start_matches("./");
    }
    match entry.strip_prefix(root) {
        Some(rest) if rest.is_empty() => basename(entry),
        Some(rest) if rest.starts_with('/') || root.ends_with('/') => rest.trim_start_matches('/'),
        _ => basename(entry),
    }
}

/// Target identifier for a resolved source entry.
///
/// Recursive entries keep their path below the source root. A single
/// non-recursive source copies onto the target itself unless the target
/// names a folder with a trailing `/`.
pub fn target_for(target: &str, source: &SourceSpec, entry: &str, multiple_sources: bool) -> String {
    if source.recursive {
        return join(target, relative_to(&source.root, entry));
    }
    if multiple_sources || target.ends_with('/') {
        return join(target, basename(entry));
    }
    target.to_string()
}
