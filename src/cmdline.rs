//! Command lines as typed argument lists.
//!
//! A [`CmdLine`] is never built by string concatenation. Each argument keeps
//! its kind until the moment it is encoded for a specific OS family, which is
//! what makes the result safe against injection and lets secrets be masked
//! whenever a command line is rendered for a log.
//!
//! # Example
//!
//! ```rust
//! use hostsession::cmdline::CmdLine;
//! use hostsession::os::OperatingSystemFamily;
//!
//! let mut cmd = CmdLine::build(["mysql", "-u", "admin"]);
//! cmd.add_password("s3cr3t").add_argument("my db");
//!
//! assert_eq!(
//!     cmd.to_command_line(OperatingSystemFamily::Unix, false).unwrap(),
//!     "mysql -u admin s3cr3t my\\ db"
//! );
//! assert_eq!(cmd.to_string(), "mysql -u admin ******** my\\ db");
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::os::OperatingSystemFamily;

/// What a secret argument looks like in logs.
pub const SECRET_MASK: &str = "********";

/// Characters that force quoting or escaping of a literal argument.
const SPECIAL_CHARS: &[char] = &[' ', '\'', '"', '\\', ';', '(', ')', '$', '{', '}', '*', '?'];

/// One argument of a [`CmdLine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdLineArgument {
    /// Plain text, quoted or escaped as needed.
    Literal(String),
    /// Like `Literal`, but masked when rendered for logging.
    Secret(String),
    /// Emitted verbatim. The caller vouches for it.
    Raw(String),
    /// A complete command line passed as a single argument.
    Nested(CmdLine),
}

impl CmdLineArgument {
    /// Encode this argument for `os`.
    pub fn encode(&self, os: OperatingSystemFamily, for_logging: bool) -> Result<String> {
        match self {
            CmdLineArgument::Literal(text) => Ok(encode_literal(text, os)),
            CmdLineArgument::Secret(_) if for_logging => Ok(SECRET_MASK.to_string()),
            CmdLineArgument::Secret(text) => Ok(encode_literal(text, os)),
            CmdLineArgument::Raw(text) => Ok(text.clone()),
            CmdLineArgument::Nested(inner) => {
                let rendered = inner.to_command_line(os, for_logging)?;
                Ok(encode_literal(&rendered, os))
            }
        }
    }
}

fn encode_literal(text: &str, os: OperatingSystemFamily) -> String {
    if text.is_empty() {
        return "\"\"".to_string();
    }
    if !text.contains(SPECIAL_CHARS) {
        return text.to_string();
    }

    let mut encoded = String::with_capacity(text.len() + 8);
    if os.is_windows() {
        encoded.push('"');
        for c in text.chars() {
            if c == '"' {
                encoded.push('"');
            }
            encoded.push(c);
        }
        encoded.push('"');
    } else {
        for c in text.chars() {
            if SPECIAL_CHARS.contains(&c) {
                encoded.push('\\');
            }
            encoded.push(c);
        }
    }
    encoded
}

/// An ordered list of command-line arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdLine {
    arguments: Vec<CmdLineArgument>,
}

impl CmdLine {
    /// Create an empty command line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a command line of literal arguments.
    pub fn build<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().collect()
    }

    /// Append a literal argument.
    pub fn add_argument(&mut self, arg: impl Into<String>) -> &mut Self {
        self.arguments.push(CmdLineArgument::Literal(arg.into()));
        self
    }

    /// Append literal arguments.
    pub fn add_arguments<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments
            .extend(args.into_iter().map(|a| CmdLineArgument::Literal(a.into())));
        self
    }

    /// Append an argument that must not show up in logs.
    pub fn add_password(&mut self, secret: impl Into<String>) -> &mut Self {
        self.arguments.push(CmdLineArgument::Secret(secret.into()));
        self
    }

    /// Append an argument that is passed through without escaping.
    pub fn add_raw(&mut self, raw: impl Into<String>) -> &mut Self {
        self.arguments.push(CmdLineArgument::Raw(raw.into()));
        self
    }

    /// Append a whole command line as one argument.
    pub fn add_nested(&mut self, nested: CmdLine) -> &mut Self {
        self.arguments.push(CmdLineArgument::Nested(nested));
        self
    }

    /// Append an argument of any kind.
    pub fn push(&mut self, arg: CmdLineArgument) -> &mut Self {
        self.arguments.push(arg);
        self
    }

    /// The arguments, in order.
    pub fn arguments(&self) -> &[CmdLineArgument] {
        &self.arguments
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Encode each argument separately.
    pub fn to_command_array(
        &self,
        os: OperatingSystemFamily,
        for_logging: bool,
    ) -> Result<Vec<String>> {
        self.check_not_empty()?;
        self.arguments
            .iter()
            .map(|arg| arg.encode(os, for_logging))
            .collect()
    }

    /// Encode the whole line, arguments separated by single spaces.
    pub fn to_command_line(&self, os: OperatingSystemFamily, for_logging: bool) -> Result<String> {
        Ok(self.to_command_array(os, for_logging)?.join(" "))
    }

    fn check_not_empty(&self) -> Result<()> {
        if self.arguments.is_empty() {
            return Err(Error::PreconditionViolation(
                "Cannot encode empty command line".to_string(),
            ));
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for CmdLine {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut cmd = CmdLine::new();
        cmd.add_arguments(iter);
        cmd
    }
}

/// Renders for UNIX with secrets masked. An empty line renders as nothing.
impl fmt::Display for CmdLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_command_line(OperatingSystemFamily::Unix, true) {
            Ok(line) => f.write_str(&line),
            Err(_) => Ok(()),
        }
    }
}
