//! Operating system families of target hosts.
//!
//! Each family is a fixed set of constants: separators, line endings, the
//! script extension and where temporary files go. The command-line encoder
//! and the temp-file logic consult these instead of the OS this crate runs on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Operating system family of a target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingSystemFamily {
    /// Microsoft Windows
    Windows,
    /// Unix and Unix-like systems
    Unix,
    /// IBM z/OS (Unix System Services)
    Zos,
}

impl OperatingSystemFamily {
    /// Family of the host this process runs on.
    pub fn local() -> Self {
        if cfg!(windows) {
            OperatingSystemFamily::Windows
        } else {
            OperatingSystemFamily::Unix
        }
    }

    /// Whether this is [`OperatingSystemFamily::Windows`].
    pub fn is_windows(self) -> bool {
        self == OperatingSystemFamily::Windows
    }

    /// Separator between path components.
    pub fn file_separator(self) -> &'static str {
        match self {
            OperatingSystemFamily::Windows => "\\",
            OperatingSystemFamily::Unix | OperatingSystemFamily::Zos => "/",
        }
    }

    /// Separator between entries of a search path.
    pub fn path_separator(self) -> &'static str {
        match self {
            OperatingSystemFamily::Windows => ";",
            OperatingSystemFamily::Unix | OperatingSystemFamily::Zos => ":",
        }
    }

    /// Line ending.
    pub fn line_separator(self) -> &'static str {
        match self {
            OperatingSystemFamily::Windows => "\r\n",
            OperatingSystemFamily::Unix | OperatingSystemFamily::Zos => "\n",
        }
    }

    /// Token that chains two commands on one line.
    pub fn command_separator(self) -> &'static str {
        match self {
            OperatingSystemFamily::Windows => "&&",
            OperatingSystemFamily::Unix | OperatingSystemFamily::Zos => ";",
        }
    }

    /// Extension for executable scripts, including the dot.
    pub fn script_extension(self) -> &'static str {
        match self {
            OperatingSystemFamily::Windows => ".bat",
            OperatingSystemFamily::Unix | OperatingSystemFamily::Zos => ".sh",
        }
    }

    /// Where temporary files live unless the `tmp` option says otherwise.
    pub fn default_temporary_directory_path(self) -> &'static str {
        match self {
            OperatingSystemFamily::Windows => "C:\\windows\\temp",
            OperatingSystemFamily::Unix | OperatingSystemFamily::Zos => "/tmp",
        }
    }

    /// Character set text files are written in by default.
    pub fn default_charset(self) -> &'static str {
        match self {
            OperatingSystemFamily::Windows => "Cp1252",
            OperatingSystemFamily::Unix => "UTF-8",
            OperatingSystemFamily::Zos => "Cp1047",
        }
    }

    /// Re-join the lines of `text` with this family's line separator.
    ///
    /// Lines are split on `\n`, tolerating a `\r` before it. A trailing line
    /// separator in the input is kept.
    pub fn convert_text(self, text: &str) -> String {
        let separator = self.line_separator();
        let mut converted = String::with_capacity(text.len());
        for line in text.split_inclusive('\n') {
            match line.strip_suffix('\n') {
                Some(body) => {
                    converted.push_str(body.strip_suffix('\r').unwrap_or(body));
                    converted.push_str(separator);
                }
                None => converted.push_str(line),
            }
        }
        converted
    }
}

impl fmt::Display for OperatingSystemFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingSystemFamily::Windows => "WINDOWS",
            OperatingSystemFamily::Unix => "UNIX",
            OperatingSystemFamily::Zos => "ZOS",
        };
        f.write_str(name)
    }
}

impl FromStr for OperatingSystemFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WINDOWS" => Ok(OperatingSystemFamily::Windows),
            "UNIX" => Ok(OperatingSystemFamily::Unix),
            "ZOS" | "Z/OS" => Ok(OperatingSystemFamily::Zos),
            other => Err(Error::invalid_option(
                "os",
                format!("unknown operating system family '{}'", other),
            )),
        }
    }
}
