//! Name → package resolution.
//!
//! The registry is the bundler-owned context threaded through every call:
//! it knows where local package sets live, where the package cache is,
//! which remote origin backs the cache, and which release manifest pins
//! cache versions. Loaded packages are cached here for the registry's
//! lifetime; `flush` discards them between bundles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use comet_config::project;
use comet_config::{PackageManifest, ReleaseManifest};

use crate::error::EngineError;
use crate::package::{
    AppHook, CollectionHook, Package, PackageId, PackageMetadata, TestHook, UseHook,
};
use crate::transform::Transform;

/// Static configuration for a registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directories whose immediate subdirectories are packages, searched
    /// before the cache. Typically a checkout's `packages/` tree.
    pub package_sets: Vec<PathBuf>,
    /// The package cache root (manifests under `manifest/`, packages under
    /// `packages/<name>/<version>/`).
    pub cache_dir: PathBuf,
    /// Base URL of the remote package origin.
    pub origin: String,
    /// Framework packages every app uses unconditionally.
    pub core_packages: Vec<String>,
    /// The framework's runtime server directory, copied into every bundle.
    pub runtime_dir: PathBuf,
}

/// Name → package resolution with caching and fetch-on-miss.
#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    release: Option<ReleaseManifest>,
    loaded: HashMap<String, Rc<Package>>,
    next_id: PackageId,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            release: None,
            loaded: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    pub fn origin(&self) -> &str {
        &self.config.origin
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.config.runtime_dir
    }

    /// Pin the release manifest used for cache lookups.
    pub fn set_release(&mut self, release: ReleaseManifest) {
        self.release = Some(release);
    }

    /// Drop every loaded package. Use between bundle invocations; ids keep
    /// counting up so stale per-bundle state can never alias a fresh load.
    pub fn flush(&mut self) {
        self.loaded.clear();
    }

    fn alloc_id(&mut self) -> PackageId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The cache slot for a pinned package version.
    pub fn cache_slot(&self, name: &str, version: &str) -> PathBuf {
        self.config
            .cache_dir
            .join("packages")
            .join(name)
            .join(version)
    }

    /// Resolve a package by name: loaded cache, then local package sets,
    /// then the on-disk package cache at the release-pinned version.
    ///
    /// # Errors
    /// Returns an error if the name appears in more than one package set,
    /// if a cache lookup is needed but no release manifest is set, or if
    /// the package cannot be found at all.
    pub fn get(&mut self, name: &str) -> Result<Rc<Package>, EngineError> {
        if let Some(pkg) = self.loaded.get(name) {
            return Ok(Rc::clone(pkg));
        }

        if let Some(dir) = self.find_in_package_sets(name)? {
            return self.load_library(name, &dir);
        }

        let Some(release) = &self.release else {
            return Err(EngineError::NoReleaseManifest {
                name: name.to_owned(),
            });
        };
        let Some(version) = release.version_of(name) else {
            return Err(EngineError::PackageNotFound {
                name: name.to_owned(),
                detail: format!("not pinned by release {}", release.version),
            });
        };
        let slot = self.cache_slot(name, version);
        if !project::is_package_dir(&slot) {
            return Err(EngineError::PackageNotFound {
                name: name.to_owned(),
                detail: format!("not in the package cache at {}", slot.display()),
            });
        }
        self.load_library(name, &slot)
    }

    /// Load a package from an explicit directory, keyed by the directory's
    /// basename. Used for collection members.
    ///
    /// # Errors
    /// Returns an error if the directory is not a package or its manifest
    /// is invalid.
    pub fn get_from_dir(&mut self, dir: &Path) -> Result<Rc<Package>, EngineError> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| EngineError::PackageNotFound {
                name: dir.display().to_string(),
                detail: "directory has no name".to_owned(),
            })?;
        if let Some(pkg) = self.loaded.get(&name) {
            return Ok(Rc::clone(pkg));
        }
        if !project::is_package_dir(dir) {
            return Err(EngineError::PackageNotFound {
                name,
                detail: format!("no {} in {}", project::MANIFEST_FILE, dir.display()),
            });
        }
        self.load_library(&name, dir)
    }

    fn find_in_package_sets(&self, name: &str) -> Result<Option<PathBuf>, EngineError> {
        let mut found: Option<PathBuf> = None;
        for set in &self.config.package_sets {
            let candidate = set.join(name);
            if !project::is_package_dir(&candidate) {
                continue;
            }
            if let Some(first) = &found {
                return Err(EngineError::AmbiguousPackage {
                    name: name.to_owned(),
                    first: first.display().to_string(),
                    second: candidate.display().to_string(),
                });
            }
            found = Some(candidate);
        }
        Ok(found)
    }

    /// Evaluate a package directory's `package.toml` into a loaded package.
    fn load_library(&mut self, name: &str, dir: &Path) -> Result<Rc<Package>, EngineError> {
        let manifest = PackageManifest::from_path(&dir.join(project::MANIFEST_FILE))?;

        let id = self.alloc_id();
        let mut pkg = Package::new(id, name, dir, format!("/packages/{name}"));
        pkg.describe(PackageMetadata {
            summary: manifest.summary,
            internal: manifest.internal,
            environments: manifest.environments,
        });
        if let Some(block) = manifest.on_use {
            pkg.set_on_use(UseHook::Declared(block))?;
        }
        if let Some(block) = manifest.on_test {
            pkg.set_on_test(TestHook::Declared(block))?;
        }
        for (ext, transform_name) in &manifest.extensions {
            let transform = Transform::from_name(transform_name).ok_or_else(|| {
                EngineError::UnknownTransform {
                    package: name.to_owned(),
                    extension: ext.clone(),
                    transform: transform_name.clone(),
                }
            })?;
            pkg.register_extension(ext, transform)?;
        }

        let pkg = Rc::new(pkg);
        self.loaded.insert(name.to_owned(), Rc::clone(&pkg));
        Ok(pkg)
    }

    /// Construct the pseudo-package for an app directory.
    ///
    /// The app uses the framework core packages plus the names declared in
    /// `.comet/packages`; its sources are registered per environment by the
    /// synthesized hooks. Not cached: an app package is per-bundle.
    ///
    /// # Errors
    /// Returns an error if the directory is not an app.
    pub fn app_package(&mut self, app_dir: &Path) -> Result<Rc<Package>, EngineError> {
        let mut uses = self.config.core_packages.clone();
        uses.extend(project::read_project_packages(app_dir)?);

        let id = self.alloc_id();
        let mut pkg = Package::new(id, "", app_dir, "/");
        pkg.set_on_use(UseHook::App(AppHook { uses: uses.clone() }))?;
        pkg.set_on_test(TestHook::App(AppHook { uses }))?;
        Ok(Rc::new(pkg))
    }

    /// Construct the pseudo-package for a collection directory: its test
    /// hook includes the tests of every member package.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    pub fn collection_package(&mut self, dir: &Path) -> Result<Rc<Package>, EngineError> {
        let entries = std::fs::read_dir(dir).map_err(|source| EngineError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut member_dirs: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EngineError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() && project::is_package_dir(&path) {
                member_dirs.push(path);
            }
        }
        member_dirs.sort();

        let id = self.alloc_id();
        let mut pkg = Package::new(id, "", "", "/");
        pkg.set_on_test(TestHook::Collection(CollectionHook { member_dirs }))?;
        Ok(Rc::new(pkg))
    }

    /// Every known package name: local package sets first, then names the
    /// release manifest pins, de-duplicated with local sets winning.
    ///
    /// # Errors
    /// Returns an error if a package-set directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>, EngineError> {
        let mut names: Vec<String> = Vec::new();
        for set in &self.config.package_sets {
            let entries = std::fs::read_dir(set).map_err(|source| EngineError::Io {
                path: set.display().to_string(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| EngineError::Io {
                    path: set.display().to_string(),
                    source,
                })?;
                let path = entry.path();
                if project::is_package_dir(&path) {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        names.push(name.to_owned());
                    }
                }
            }
        }
        if let Some(release) = &self.release {
            names.extend(release.packages.keys().cloned());
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}
