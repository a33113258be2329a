//! The `package.toml` package manifest.
//!
//! A package declares its metadata, an optional `[on_use]` block (what to
//! pull in and which sources to register when the package is used), an
//! optional `[on_test]` block, and an `[extensions]` map binding file
//! extensions to named source transforms. The blocks are declarative
//! counterparts of the framework's four declaration operations; TOML's own
//! rules make a duplicated block or an unknown key a parse error.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::environment::Environment;

/// A parsed `package.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageManifest {
    /// One-line human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Internal packages are hidden from `list` output shown to users.
    #[serde(default)]
    pub internal: bool,
    /// Environments the package is meant for (informational metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environments: Option<Vec<Environment>>,
    /// Declarations applied when the package is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_use: Option<DeclarationBlock>,
    /// Declarations applied when the package's tests are included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_test: Option<DeclarationBlock>,
    /// Extension (without dot) → named source transform.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

/// The body of an `[on_use]` or `[on_test]` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclarationBlock {
    /// Packages to use, resolved in the environments the declaring package
    /// was used for.
    #[serde(default, rename = "use", skip_serializing_if = "Vec::is_empty")]
    pub use_packages: Vec<String>,
    /// Source files to register.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileGroup>,
}

/// A group of source paths bound to an environment set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileGroup {
    /// Paths relative to the package's source root.
    pub paths: Vec<String>,
    /// Target environments; omitted means the environments the package was
    /// used for.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<Vec<Environment>>,
}

fn validate(manifest: &PackageManifest, path: &str) -> Result<(), ManifestError> {
    for ext in manifest.extensions.keys() {
        if ext.is_empty() || ext.starts_with('.') {
            return Err(ManifestError::InvalidExtension {
                path: path.to_owned(),
                extension: ext.clone(),
            });
        }
    }
    for block in [&manifest.on_use, &manifest.on_test].into_iter().flatten() {
        for group in &block.files {
            if group.paths.is_empty() {
                return Err(ManifestError::EmptyFileGroup {
                    path: path.to_owned(),
                });
            }
        }
    }
    Ok(())
}

impl PackageManifest {
    /// Read and parse a `package.toml` from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, contains invalid TOML,
    /// has unknown keys, or fails validation.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&content, &path.display().to_string())
    }

    /// Parse a manifest from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the string contains invalid TOML, has unknown
    /// keys, or fails validation.
    pub fn from_str(content: &str, path: &str) -> Result<Self, ManifestError> {
        let manifest: PackageManifest =
            toml::from_str(content).map_err(|e| ManifestError::Parse {
                path: path.to_owned(),
                source: e,
            })?;
        validate(&manifest, path)?;
        Ok(manifest)
    }

    /// Serialize the manifest to a TOML string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ManifestError> {
        toml::to_string_pretty(self).map_err(|e| ManifestError::Serialize { source: e })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid package.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("cannot serialize manifest: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("extension key `{extension}` in {path} must be non-empty and written without the leading dot")]
    InvalidExtension { path: String, extension: String },
    #[error("a files group in {path} has an empty paths list")]
    EmptyFileGroup { path: String },
}
