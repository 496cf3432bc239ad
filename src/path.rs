//! Paths on a target host.

use std::fmt;

use crate::os::OperatingSystemFamily;

/// A path on the target host, joined with the separator of its OS family.
///
/// The path is kept as text: the host this crate runs on may use a different
/// separator than the target, so `std::path::Path` would split it wrongly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPath {
    path: String,
    os: OperatingSystemFamily,
}

impl HostPath {
    /// Create a path for a host of the given family.
    pub fn new(path: impl Into<String>, os: OperatingSystemFamily) -> Self {
        Self {
            path: path.into(),
            os,
        }
    }

    /// The full path as text.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// OS family the path belongs to.
    pub fn os(&self) -> OperatingSystemFamily {
        self.os
    }

    /// Path of the entry `name` inside this directory.
    pub fn child(&self, name: &str) -> HostPath {
        let separator = self.os.file_separator();
        let path = if self.path.ends_with(separator) {
            format!("{}{}", self.path, name)
        } else {
            format!("{}{}{}", self.path, separator, name)
        };
        HostPath { path, os: self.os }
    }

    /// Last component of the path.
    pub fn name(&self) -> &str {
        let separator = self.os.file_separator();
        let trimmed = self.path.trim_end_matches(separator);
        match trimmed.rfind(separator) {
            Some(pos) => &trimmed[pos + separator.len()..],
            None => trimmed,
        }
    }

    /// Directory containing this path, if any.
    pub fn parent(&self) -> Option<HostPath> {
        let separator = self.os.file_separator();
        let trimmed = self.path.trim_end_matches(separator);
        let pos = trimmed.rfind(separator)?;
        let parent = if pos == 0 {
            separator.to_string()
        } else {
            trimmed[..pos].to_string()
        };
        Some(HostPath {
            path: parent,
            os: self.os,
        })
    }
}

impl fmt::Display for HostPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
