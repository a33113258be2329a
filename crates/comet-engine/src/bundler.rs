//! The public bundling entry point.
//!
//! `bundle` never panics or leaks an error type across the boundary: it
//! returns the ordered list of diagnostics on failure, where declaration,
//! conflict, and I/O errors become a single "Exception while bundling"
//! entry and handler-reported soft errors accumulate.

use std::path::Path;
use std::rc::Rc;

use comet_config::project;
use comet_config::Environment;

use crate::bundle::Bundle;
use crate::emit::{self, NodeModulesMode};
use crate::error::EngineError;
use crate::fetch;
use crate::minify::{self, Minifiers};
use crate::package::Package;
use crate::registry::Registry;

/// Options for one bundling run.
#[derive(Debug)]
pub struct BundleOptions {
    /// How native-module directories reach the output tree. Required.
    pub node_modules_mode: NodeModulesMode,
    /// Minifiers for client assets; `None` disables minification and
    /// leaves each asset at its own cache-busted URL.
    pub minify: Option<Minifiers>,
    /// Packages (by name, package directory, collection directory, or the
    /// app directory itself) whose tests should be included.
    pub test_packages: Option<Vec<String>>,
    /// Overrides the project's `.comet/release` pin.
    pub release_override: Option<String>,
}

/// Bundle the app at `app_dir` into `output`.
///
/// # Errors
/// Returns the ordered list of diagnostics when bundling fails. A
/// non-empty list means failure even if an output directory was written.
pub fn bundle(
    app_dir: &Path,
    output: &Path,
    registry: &mut Registry,
    options: &BundleOptions,
) -> Result<(), Vec<String>> {
    match bundle_inner(app_dir, output, registry, options) {
        Ok(errors) if errors.is_empty() => Ok(()),
        Ok(errors) => Err(errors),
        Err(e) => Err(vec![format!("Exception while bundling application:\n{e}")]),
    }
}

fn bundle_inner(
    app_dir: &Path,
    output: &Path,
    registry: &mut Registry,
    options: &BundleOptions,
) -> Result<Vec<String>, EngineError> {
    let release_version = match &options.release_override {
        Some(version) => Some(version.clone()),
        None => project::read_project_release(app_dir)?,
    };
    if let Some(version) = release_version {
        let manifest = fetch::load_release_manifest(registry, &version)?;
        registry.set_release(manifest);
    }

    let app = registry.app_package(app_dir)?;
    let mut bundle = Bundle::new();
    bundle.use_package(
        registry,
        &app,
        &[Environment::Client, Environment::Server],
        None,
    )?;

    if let Some(names) = &options.test_packages {
        for name in names {
            let target = resolve_test_target(registry, name, app_dir, &app)?;
            bundle.include_tests(registry, &target)?;
        }
    }

    if let Some(minifiers) = &options.minify {
        minify::minify_bundle(&mut bundle, minifiers);
    }

    emit::write_to_directory(
        &mut bundle,
        registry,
        &app,
        output,
        app_dir,
        options.node_modules_mode,
    )?;

    Ok(bundle.errors)
}

/// A test target is a package name, a package or collection directory, or
/// the app itself.
fn resolve_test_target(
    registry: &mut Registry,
    name: &str,
    app_dir: &Path,
    app: &Rc<Package>,
) -> Result<Rc<Package>, EngineError> {
    let path = Path::new(name);
    if path.is_dir() {
        if same_dir(path, app_dir) {
            return Ok(Rc::clone(app));
        }
        if project::is_collection_dir(path) {
            return registry.collection_package(path);
        }
        if project::is_package_dir(path) {
            return registry.get_from_dir(path);
        }
    }
    registry.get(name)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}
