//! Release manifests: a JSON document pinning package names to versions
//! for one framework release.

use std::collections::BTreeMap;

use serde::Deserialize;

/// The wire/cache document. Unknown top-level fields are tolerated so the
/// origin can grow the schema without breaking older bundlers.
#[derive(Debug, Deserialize)]
struct ReleaseManifestDoc {
    packages: BTreeMap<String, String>,
}

/// A release identifier plus its package → version pins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifest {
    pub version: String,
    pub packages: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("invalid release manifest for {version}: {source}")]
    Parse {
        version: String,
        source: serde_json::Error,
    },
}

impl ReleaseManifest {
    /// Parse the manifest JSON fetched for (or cached under) `version`.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid manifest document.
    pub fn from_json_bytes(version: &str, bytes: &[u8]) -> Result<Self, ReleaseError> {
        let doc: ReleaseManifestDoc =
            serde_json::from_slice(bytes).map_err(|source| ReleaseError::Parse {
                version: version.to_owned(),
                source,
            })?;
        Ok(Self {
            version: version.to_owned(),
            packages: doc.packages,
        })
    }

    /// The pinned version of `name`, if the release carries it.
    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.packages.get(name).map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_manifest() {
        let manifest = ReleaseManifest::from_json_bytes(
            "0.9.2",
            br#"{"packages": {"store": "1.4.0", "sessions": "0.2.1"}}"#,
        )
        .unwrap();
        assert_eq!(manifest.version, "0.9.2");
        assert_eq!(manifest.version_of("store"), Some("1.4.0"));
        assert_eq!(manifest.version_of("absent"), None);
    }

    #[test]
    fn unknown_top_level_fields_tolerated() {
        let manifest = ReleaseManifest::from_json_bytes(
            "0.9.2",
            br#"{"packages": {}, "runtime": "node-18", "notices": []}"#,
        )
        .unwrap();
        assert!(manifest.packages.is_empty());
    }

    #[test]
    fn invalid_json_errors() {
        let result = ReleaseManifest::from_json_bytes("0.9.2", b"{not json");
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("0.9.2"), "error was: {err}");
    }

    #[test]
    fn missing_packages_key_errors() {
        let result = ReleaseManifest::from_json_bytes("0.9.2", b"{}");
        assert!(result.is_err());
    }
}
