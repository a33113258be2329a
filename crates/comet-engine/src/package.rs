//! The package model: an app, a library package, or a collection.
//!
//! All three variants share one record; what distinguishes them is which
//! hooks they carry. A library package's hooks are interpreted from its
//! `package.toml`; an app's and a collection's hooks are synthesized by the
//! registry from the project layout.

use std::collections::BTreeMap;
use std::path::PathBuf;

use comet_config::{DeclarationBlock, Environment};

use crate::error::EngineError;
use crate::transform::Transform;

/// Process-local package identity. Allocated monotonically by the registry
/// and never reused while it lives, so per-bundle state can key on it.
pub type PackageId = u64;

/// Declarative metadata merged in by `describe`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageMetadata {
    pub summary: Option<String>,
    pub internal: bool,
    pub environments: Option<Vec<Environment>>,
}

/// What happens when a package is used in a bundle.
#[derive(Debug, Clone)]
pub enum UseHook {
    /// Interpret the `[on_use]` block of a `package.toml`.
    Declared(DeclarationBlock),
    /// Synthesized app behavior: use the framework and project packages,
    /// then register the app's own source tree per environment.
    App(AppHook),
}

/// What happens when a package's tests are included.
#[derive(Debug, Clone)]
pub enum TestHook {
    /// Interpret the `[on_test]` block of a `package.toml`.
    Declared(DeclarationBlock),
    /// Synthesized app behavior over the `tests/` portions of the tree.
    App(AppHook),
    /// Include the tests of every member package of a collection.
    Collection(CollectionHook),
}

/// Shared payload of the synthesized app hooks.
#[derive(Debug, Clone)]
pub struct AppHook {
    /// Framework core packages plus the names from `.comet/packages`.
    pub uses: Vec<String>,
}

/// Payload of the synthesized collection test hook.
#[derive(Debug, Clone)]
pub struct CollectionHook {
    /// Member package directories, sorted for determinism.
    pub member_dirs: Vec<PathBuf>,
}

/// A loaded package: uniform across apps, libraries, and collections.
#[derive(Debug)]
pub struct Package {
    pub id: PackageId,
    /// Empty for app and collection pseudo-packages.
    pub name: String,
    /// Where sources live; empty for collections.
    pub source_root: PathBuf,
    /// URL-space prefix: `/` for an app, `/packages/<name>` for a library.
    pub serve_root: String,
    pub metadata: PackageMetadata,
    on_use: Option<UseHook>,
    on_test: Option<TestHook>,
    extensions: BTreeMap<String, Transform>,
}

impl Package {
    pub(crate) fn new(
        id: PackageId,
        name: impl Into<String>,
        source_root: impl Into<PathBuf>,
        serve_root: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            source_root: source_root.into(),
            serve_root: serve_root.into(),
            metadata: PackageMetadata::default(),
            on_use: None,
            on_test: None,
            extensions: BTreeMap::new(),
        }
    }

    fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.source_root.display().to_string()
        } else {
            self.name.clone()
        }
    }

    /// Merge declarative metadata into the package.
    pub fn describe(&mut self, metadata: PackageMetadata) {
        if metadata.summary.is_some() {
            self.metadata.summary = metadata.summary;
        }
        if metadata.environments.is_some() {
            self.metadata.environments = metadata.environments;
        }
        self.metadata.internal = metadata.internal;
    }

    /// Declare the use hook.
    ///
    /// # Errors
    /// Returns an error if a use hook was already declared.
    pub fn set_on_use(&mut self, hook: UseHook) -> Result<(), EngineError> {
        if self.on_use.is_some() {
            return Err(EngineError::DuplicateHandler {
                package: self.display_name(),
                which: "on_use".to_owned(),
            });
        }
        self.on_use = Some(hook);
        Ok(())
    }

    /// Declare the test hook.
    ///
    /// # Errors
    /// Returns an error if a test hook was already declared.
    pub fn set_on_test(&mut self, hook: TestHook) -> Result<(), EngineError> {
        if self.on_test.is_some() {
            return Err(EngineError::DuplicateHandler {
                package: self.display_name(),
                which: "on_test".to_owned(),
            });
        }
        self.on_test = Some(hook);
        Ok(())
    }

    /// Bind an extension (without the leading dot) to a transform.
    ///
    /// # Errors
    /// Returns an error if the extension is already registered on this
    /// package.
    pub fn register_extension(&mut self, ext: &str, transform: Transform) -> Result<(), EngineError> {
        if self.extensions.contains_key(ext) {
            return Err(EngineError::DuplicateExtension {
                package: self.display_name(),
                extension: ext.to_owned(),
            });
        }
        self.extensions.insert(ext.to_owned(), transform);
        Ok(())
    }

    pub fn on_use(&self) -> Option<&UseHook> {
        self.on_use.as_ref()
    }

    pub fn on_test(&self) -> Option<&TestHook> {
        self.on_test.as_ref()
    }

    pub fn extensions(&self) -> &BTreeMap<String, Transform> {
        &self.extensions
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_package() -> Package {
        Package::new(1, "store", "/tmp/store", "/packages/store")
    }

    #[test]
    fn duplicate_on_use_is_an_error() {
        let mut pkg = make_package();
        pkg.set_on_use(UseHook::Declared(DeclarationBlock::default()))
            .unwrap();
        let err = pkg
            .set_on_use(UseHook::Declared(DeclarationBlock::default()))
            .unwrap_err();
        assert!(err.to_string().contains("on_use"), "error was: {err}");
        assert!(err.to_string().contains("store"), "error was: {err}");
    }

    #[test]
    fn duplicate_on_test_is_an_error() {
        let mut pkg = make_package();
        pkg.set_on_test(TestHook::Declared(DeclarationBlock::default()))
            .unwrap();
        let err = pkg
            .set_on_test(TestHook::Declared(DeclarationBlock::default()))
            .unwrap_err();
        assert!(err.to_string().contains("on_test"), "error was: {err}");
    }

    #[test]
    fn duplicate_extension_is_an_error() {
        let mut pkg = make_package();
        pkg.register_extension("coffee", Transform::Js).unwrap();
        let err = pkg
            .register_extension("coffee", Transform::Js)
            .unwrap_err();
        assert!(err.to_string().contains("coffee"), "error was: {err}");
    }

    #[test]
    fn distinct_extensions_coexist() {
        let mut pkg = make_package();
        pkg.register_extension("js", Transform::Js).unwrap();
        pkg.register_extension("css", Transform::Css).unwrap();
        assert_eq!(pkg.extensions().len(), 2);
    }

    #[test]
    fn describe_merges_provided_fields() {
        let mut pkg = make_package();
        pkg.describe(PackageMetadata {
            summary: Some("kv store".to_owned()),
            internal: true,
            environments: None,
        });
        assert_eq!(pkg.metadata.summary.as_deref(), Some("kv store"));
        assert!(pkg.metadata.internal);
    }
}
