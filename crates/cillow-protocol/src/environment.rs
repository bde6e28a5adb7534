// SPDX-License-Identifier: MIT OR Apache-2.0
//! Environment identifiers and trust-boundary validation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Wire and display form of [`Environment::System`].
pub const SYSTEM_TOKEN: &str = "$system";

/// Error raised when an environment fails trust-boundary validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    /// The path does not exist or does not contain `lib/site-packages/`.
    #[error("Python environment '{0}' is invalid or not found.")]
    Invalid(String),
}

/// A language environment: the broker host's default installation, or a
/// directory containing `lib/site-packages/`.
///
/// Parsing (`FromStr`, serde) is shape-only; call [`Environment::validate`]
/// whenever a value crosses a trust boundary. Validated values carry the
/// canonical path, so equality is by normalized path for the filesystem
/// variant and by tag for `System`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Environment {
    /// Use the host's default language installation.
    System,
    /// A user-provided environment directory.
    Path(PathBuf),
}

impl Environment {
    /// Validate a raw, client-supplied environment string.
    ///
    /// `$system` always passes. Anything else is tilde-expanded and
    /// canonicalized, and must contain a `lib/site-packages/` directory.
    pub fn validate(spec: &str) -> Result<Self, EnvironmentError> {
        if spec == SYSTEM_TOKEN {
            return Ok(Self::System);
        }

        let expanded = expand_user(spec);
        let canonical = expanded
            .canonicalize()
            .map_err(|_| EnvironmentError::Invalid(expanded.display().to_string()))?;
        if !canonical.join("lib").join("site-packages").is_dir() {
            return Err(EnvironmentError::Invalid(canonical.display().to_string()));
        }
        Ok(Self::Path(canonical))
    }

    /// Returns `true` for the `$system` variant.
    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// The environment directory, if this is a filesystem environment.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::System => None,
            Self::Path(p) => Some(p.as_path()),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str(SYSTEM_TOKEN),
            Self::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == SYSTEM_TOKEN {
            Ok(Self::System)
        } else {
            Ok(Self::Path(PathBuf::from(s)))
        }
    }
}

impl Serialize for Environment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(if s == SYSTEM_TOKEN {
            Self::System
        } else {
            Self::Path(PathBuf::from(s))
        })
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_user(spec: &str) -> PathBuf {
    if let Some(rest) = spec.strip_prefix("~") {
        let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
        if let Some(home) = home {
            let rest = rest.strip_prefix(['/', '\\']).unwrap_or(rest);
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(spec)
}
