//! The bundle accumulator: dependency resolution, source registration,
//! and the typed-resource sink.
//!
//! `Bundle::use_package` walks the use graph. Each package occurrence gets
//! a [`PackageBundlingInfo`]; hooks run through a [`PackageApi`] handle and
//! feed resources back in through [`Bundle::add_resource`], the sole sink
//! for generated content.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use comet_config::project;
use comet_config::{canonical_where, DeclarationBlock, Environment};

use crate::error::EngineError;
use crate::package::{AppHook, CollectionHook, Package, PackageId, TestHook, UseHook};
use crate::registry::Registry;
use crate::sources;
use crate::transform::Transform;

/// The type of a resource handed to [`Bundle::add_resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Js,
    Css,
    Head,
    Body,
    Static,
}

impl ResourceType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Css => "css",
            Self::Head => "head",
            Self::Body => "body",
            Self::Static => "static",
        }
    }
}

/// Resource types that appear in the static manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestType {
    Js,
    Css,
    Static,
}

/// One entry of the bundle's static manifest (`app.json`'s `manifest`
/// list). Paths and URLs use forward slashes on every host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    #[serde(rename = "where")]
    pub where_: String,
    #[serde(rename = "type")]
    pub kind: ManifestType,
    pub cacheable: bool,
    pub url: String,
    pub size: u64,
    pub hash: String,
}

/// Options for [`Bundle::add_resource`]. `data` takes precedence over
/// `source_file`.
#[derive(Debug)]
pub struct ResourceOptions {
    pub kind: ResourceType,
    pub where_: Vec<Environment>,
    pub path: Option<String>,
    pub data: Option<Vec<u8>>,
    pub source_file: Option<PathBuf>,
}

/// Per-(package, bundle) occurrence state.
#[derive(Debug)]
pub struct PackageBundlingInfo {
    pub package: Rc<Package>,
    /// Canonical environment sets this occurrence has been configured for;
    /// makes `use` idempotent per environment set.
    configured: HashSet<BTreeSet<Environment>>,
    /// Packages this occurrence pulled in, in first-use order. Scopes
    /// extension-handler lookup.
    pub using: IndexSet<PackageId>,
    /// Environment → source files registered so far.
    pub files: BTreeMap<Environment, HashSet<String>>,
    /// Files whose content changes should trigger a rebuild.
    pub dependencies: BTreeSet<String>,
}

impl PackageBundlingInfo {
    fn new(package: Rc<Package>) -> Self {
        Self {
            package,
            configured: HashSet::new(),
            using: IndexSet::new(),
            files: BTreeMap::new(),
            dependencies: BTreeSet::new(),
        }
    }
}

/// Ordered client/server output lists for one resource type.
#[derive(Debug, Default)]
pub struct JsLists {
    pub client: Vec<String>,
    pub server: Vec<String>,
}

/// The three disjoint output file maps. Iteration order is insertion
/// order; the server map's order becomes the runtime load order.
#[derive(Debug, Default)]
pub struct FileMaps {
    pub client: IndexMap<String, Vec<u8>>,
    pub client_cacheable: IndexMap<String, Vec<u8>>,
    pub server: IndexMap<String, Vec<u8>>,
}

/// Accumulator for one bundling run.
#[derive(Debug, Default)]
pub struct Bundle {
    pub infos: IndexMap<PackageId, PackageBundlingInfo>,
    tests_included: HashSet<PackageId>,
    /// Packages whose hooks are currently on the call stack, for cycle
    /// diagnostics.
    in_progress: Vec<PackageId>,
    pub js: JsLists,
    pub css: Vec<String>,
    pub files: FileMaps,
    pub manifest: Vec<ManifestEntry>,
    /// Bundle-relative target → source directory on disk.
    pub node_modules_dirs: BTreeMap<String, PathBuf>,
    pub head: Vec<String>,
    pub body: Vec<String>,
    pub errors: Vec<String>,
}

/// Join a serve root and a relative source path into a URL-space path.
pub(crate) fn join_serve(serve_root: &str, rel_path: &str) -> String {
    let rel = rel_path.replace('\\', "/");
    if serve_root.ends_with('/') {
        format!("{serve_root}{rel}")
    } else {
        format!("{serve_root}/{rel}")
    }
}

/// A stored serve path, stripped for joining onto a directory on disk.
pub(crate) fn disk_rel(serve_path: &str) -> &str {
    serve_path.trim_start_matches('/')
}

/// Byte length as `u64`. Infallible on 32-bit and 64-bit platforms.
pub(crate) fn u64_len(bytes: &[u8]) -> u64 {
    u64::try_from(bytes.len()).unwrap_or(u64::MAX)
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_info(&mut self, pkg: &Rc<Package>) {
        if !self.infos.contains_key(&pkg.id) {
            let mut info = PackageBundlingInfo::new(Rc::clone(pkg));
            if !pkg.name.is_empty() {
                // The manifest itself always triggers a rebuild.
                info.dependencies.insert(project::MANIFEST_FILE.to_owned());
            }
            self.infos.insert(pkg.id, info);
        }
    }

    fn display_name(pkg: &Package) -> String {
        if pkg.name.is_empty() {
            "the app".to_owned()
        } else {
            pkg.name.clone()
        }
    }

    fn cycle_error(&self, pkg: &Package) -> EngineError {
        let mut names: Vec<String> = self
            .in_progress
            .iter()
            .filter_map(|id| self.infos.get(id))
            .map(|info| Self::display_name(&info.package))
            .collect();
        names.push(Self::display_name(pkg));
        EngineError::DependencyCycle {
            chain: names.join(" -> "),
        }
    }

    /// Configure `pkg` for the given environments, running its use hook at
    /// most once per canonical environment set.
    ///
    /// # Errors
    /// Returns an error if the use graph cycles, a dependency cannot be
    /// resolved, or a hook fails.
    pub fn use_package(
        &mut self,
        registry: &mut Registry,
        pkg: &Rc<Package>,
        where_: &[Environment],
        from: Option<PackageId>,
    ) -> Result<(), EngineError> {
        self.ensure_info(pkg);
        if let Some(parent) = from {
            if let Some(info) = self.infos.get_mut(&parent) {
                info.using.insert(pkg.id);
            }
        }

        let key = canonical_where(where_);
        if let Some(info) = self.infos.get_mut(&pkg.id) {
            if !info.configured.insert(key) {
                return Ok(());
            }
        }

        if self.in_progress.contains(&pkg.id) {
            return Err(self.cycle_error(pkg));
        }

        if !pkg.name.is_empty() {
            let node_modules = pkg.source_root.join("node_modules");
            if node_modules.is_dir() {
                self.node_modules_dirs.insert(
                    format!("app/packages/{}/node_modules", pkg.name),
                    node_modules,
                );
            }
        }

        let package = Rc::clone(pkg);
        let Some(hook) = package.on_use() else {
            return Ok(());
        };

        self.in_progress.push(pkg.id);
        let result = {
            let mut api = PackageApi {
                bundle: self,
                registry,
                package: Rc::clone(&package),
            };
            run_use_hook(&mut api, hook, where_)
        };
        self.in_progress.pop();
        result
    }

    /// Include a package's tests, at most once per package id.
    ///
    /// # Errors
    /// Returns an error if the test hook fails.
    pub fn include_tests(
        &mut self,
        registry: &mut Registry,
        pkg: &Rc<Package>,
    ) -> Result<(), EngineError> {
        if !self.tests_included.insert(pkg.id) {
            return Ok(());
        }
        self.ensure_info(pkg);

        let package = Rc::clone(pkg);
        let Some(hook) = package.on_test() else {
            return Ok(());
        };

        let where_ = [Environment::Client, Environment::Server];
        self.in_progress.push(pkg.id);
        let result = {
            let mut api = PackageApi {
                bundle: self,
                registry,
                package: Rc::clone(&package),
            };
            run_test_hook(&mut api, hook, &where_)
        };
        self.in_progress.pop();
        result
    }

    /// Extensions visible to `pkg`: its own plus those of the packages it
    /// directly uses. Handler lookup is intentionally non-transitive.
    pub fn registered_extensions(&self, pkg: &Package) -> BTreeSet<String> {
        let mut extensions: BTreeSet<String> = pkg.extensions().keys().cloned().collect();
        if let Some(info) = self.infos.get(&pkg.id) {
            for child_id in &info.using {
                if let Some(child) = self.infos.get(child_id) {
                    extensions.extend(child.package.extensions().keys().cloned());
                }
            }
        }
        extensions
    }

    fn lookup_transform(
        &self,
        pkg: &Package,
        rel_path: &str,
    ) -> Result<Option<Transform>, EngineError> {
        let Some(ext) = Path::new(rel_path).extension().and_then(|e| e.to_str()) else {
            return Ok(None);
        };

        let mut candidates: Vec<(String, Transform)> = Vec::new();
        if let Some(transform) = pkg.extensions().get(ext) {
            candidates.push((Self::display_name(pkg), *transform));
        }
        if let Some(info) = self.infos.get(&pkg.id) {
            for child_id in &info.using {
                if let Some(child) = self.infos.get(child_id) {
                    if let Some(transform) = child.package.extensions().get(ext) {
                        candidates.push((Self::display_name(&child.package), *transform));
                    }
                }
            }
        }

        let mut iter = candidates.into_iter();
        match (iter.next(), iter.next()) {
            (None, _) => Ok(None),
            (Some((_, transform)), None) => Ok(Some(transform)),
            (Some((first, _)), Some((second, _))) => Err(EngineError::ExtensionConflict {
                extension: ext.to_owned(),
                first,
                second,
            }),
        }
    }

    /// Register one source file of `pkg` for one environment.
    ///
    /// Files with a matching transform run through it and join the
    /// package's dependency set; files without one are emitted verbatim as
    /// `static` resources and stay out of the dependency set (static
    /// assets are watched through the app's `public/` tree instead).
    pub(crate) fn add_file(
        &mut self,
        pkg: &Rc<Package>,
        rel_path: &str,
        env: Environment,
    ) -> Result<(), EngineError> {
        if Path::new(rel_path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(EngineError::SourceOutsideRoot {
                path: rel_path.to_owned(),
                root: pkg.source_root.display().to_string(),
            });
        }

        if let Some(info) = self.infos.get_mut(&pkg.id) {
            if !info.files.entry(env).or_default().insert(rel_path.to_owned()) {
                return Ok(());
            }
        }

        let transform = self.lookup_transform(pkg, rel_path)?;
        let abs = pkg.source_root.join(rel_path);
        let serve_path = join_serve(&pkg.serve_root, rel_path);

        match transform {
            None => {
                let data = std::fs::read(&abs).map_err(|source| EngineError::Io {
                    path: abs.display().to_string(),
                    source,
                })?;
                self.add_resource(ResourceOptions {
                    kind: ResourceType::Static,
                    where_: vec![env],
                    path: Some(serve_path),
                    data: Some(data),
                    source_file: None,
                })
            }
            Some(transform) => {
                transform.apply(self, &abs, &serve_path, &[env])?;
                if let Some(info) = self.infos.get_mut(&pkg.id) {
                    info.dependencies.insert(rel_path.to_owned());
                }
                Ok(())
            }
        }
    }

    /// The sole sink for generated content.
    ///
    /// # Errors
    /// Returns an error for a missing path, an empty or invalid environment
    /// set, missing contents, or an unreadable source file.
    pub fn add_resource(&mut self, options: ResourceOptions) -> Result<(), EngineError> {
        let kind = options.kind;
        if options.where_.is_empty() {
            return Err(EngineError::MissingWhere {
                kind: kind.name().to_owned(),
            });
        }

        let bytes = match options.data {
            Some(data) => data,
            None => {
                let Some(source) = &options.source_file else {
                    return Err(EngineError::MissingContents {
                        kind: kind.name().to_owned(),
                        path: options.path.clone().unwrap_or_default(),
                    });
                };
                std::fs::read(source).map_err(|source_err| EngineError::Io {
                    path: source.display().to_string(),
                    source: source_err,
                })?
            }
        };

        let path_required = || -> Result<String, EngineError> {
            options.path.clone().ok_or_else(|| EngineError::MissingPath {
                kind: kind.name().to_owned(),
            })
        };

        for env in canonical_where(&options.where_) {
            match kind {
                ResourceType::Js => {
                    let path = path_required()?;
                    match env {
                        Environment::Client => {
                            self.files.client.insert(path.clone(), bytes.clone());
                            self.js.client.push(path);
                        }
                        Environment::Server => {
                            self.files.server.insert(path.clone(), bytes.clone());
                            self.js.server.push(path);
                        }
                        Environment::Tests => {
                            return Err(EngineError::InvalidEnvironment {
                                kind: kind.name().to_owned(),
                                environment: env.to_string(),
                            });
                        }
                    }
                }
                ResourceType::Css => {
                    // Stylesheets only exist client-side; a .css file routed
                    // to the server tree is dropped rather than rejected.
                    if env != Environment::Client {
                        continue;
                    }
                    let path = path_required()?;
                    self.files.client.insert(path.clone(), bytes.clone());
                    self.css.push(path);
                }
                ResourceType::Head | ResourceType::Body => {
                    if env != Environment::Client {
                        return Err(EngineError::InvalidEnvironment {
                            kind: kind.name().to_owned(),
                            environment: env.to_string(),
                        });
                    }
                    let text = String::from_utf8(bytes.clone()).map_err(|_| {
                        EngineError::FragmentNotUtf8 {
                            path: options
                                .path
                                .clone()
                                .or_else(|| {
                                    options
                                        .source_file
                                        .as_ref()
                                        .map(|p| p.display().to_string())
                                })
                                .unwrap_or_default(),
                        }
                    })?;
                    if kind == ResourceType::Head {
                        self.head.push(text);
                    } else {
                        self.body.push(text);
                    }
                }
                ResourceType::Static => {
                    let path = path_required()?;
                    match env {
                        Environment::Client => {
                            self.files.client.insert(path, bytes.clone());
                        }
                        Environment::Server => {
                            self.files.server.insert(path, bytes.clone());
                        }
                        Environment::Tests => {
                            return Err(EngineError::InvalidEnvironment {
                                kind: kind.name().to_owned(),
                                environment: env.to_string(),
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Record a soft diagnostic. Bundling continues so dependency
    /// information is still written; a non-empty error list still fails
    /// the run.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub(crate) fn info(&self, id: PackageId) -> Option<&PackageBundlingInfo> {
        self.infos.get(&id)
    }
}

/// The api handle a package occurrence's hooks operate through.
pub struct PackageApi<'a> {
    bundle: &'a mut Bundle,
    registry: &'a mut Registry,
    package: Rc<Package>,
}

impl PackageApi<'_> {
    /// Resolve and use packages in the given environments, recording the
    /// use edges from this occurrence.
    ///
    /// # Errors
    /// Returns an error if resolution or a downstream hook fails.
    pub fn use_packages(
        &mut self,
        names: &[String],
        where_: &[Environment],
    ) -> Result<(), EngineError> {
        for name in names {
            let dep = self.registry.get(name)?;
            self.bundle
                .use_package(self.registry, &dep, where_, Some(self.package.id))?;
        }
        Ok(())
    }

    /// Register source files for each environment in `where_`.
    ///
    /// # Errors
    /// Returns an error if a path escapes the source root, a transform
    /// fails, or an extension is claimed twice in scope.
    pub fn add_files(&mut self, paths: &[String], where_: &[Environment]) -> Result<(), EngineError> {
        for path in paths {
            for env in where_ {
                self.bundle.add_file(&self.package, path, *env)?;
            }
        }
        Ok(())
    }

    /// Extensions currently in scope for this occurrence.
    pub fn registered_extensions(&self) -> BTreeSet<String> {
        self.bundle.registered_extensions(&self.package)
    }

    /// Report a soft error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.bundle.record_error(message);
    }

    fn include_tests_at(&mut self, dir: &Path) -> Result<(), EngineError> {
        let pkg = self.registry.get_from_dir(dir)?;
        self.bundle.include_tests(self.registry, &pkg)
    }
}

fn run_use_hook(
    api: &mut PackageApi<'_>,
    hook: &UseHook,
    where_: &[Environment],
) -> Result<(), EngineError> {
    match hook {
        UseHook::Declared(block) => apply_declaration(api, block, where_),
        UseHook::App(app) => apply_app_hook(api, app, where_, HookPhase::Use),
    }
}

fn run_test_hook(
    api: &mut PackageApi<'_>,
    hook: &TestHook,
    where_: &[Environment],
) -> Result<(), EngineError> {
    match hook {
        TestHook::Declared(block) => apply_declaration(api, block, where_),
        TestHook::App(app) => apply_app_hook(api, app, where_, HookPhase::Test),
        TestHook::Collection(collection) => apply_collection_hook(api, collection),
    }
}

fn apply_declaration(
    api: &mut PackageApi<'_>,
    block: &DeclarationBlock,
    where_: &[Environment],
) -> Result<(), EngineError> {
    // Dependencies first, so their extension handlers are in scope before
    // this package's files are dispatched.
    api.use_packages(&block.use_packages, where_)?;
    for group in &block.files {
        let envs: Vec<Environment> = match &group.where_ {
            Some(envs) => envs.clone(),
            None => where_.to_vec(),
        };
        api.add_files(&group.paths, &envs)?;
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum HookPhase {
    Use,
    Test,
}

/// The synthesized app behavior: sources outside a `server` segment run on
/// the client, sources outside a `client` segment run on the server, and
/// everything under a `tests` segment belongs to the test phase only.
fn apply_app_hook(
    api: &mut PackageApi<'_>,
    hook: &AppHook,
    where_: &[Environment],
    phase: HookPhase,
) -> Result<(), EngineError> {
    api.use_packages(&hook.uses, where_)?;

    let extensions = api.registered_extensions();
    let source_root = api.package.source_root.clone();
    let files = sources::package_sources(&source_root, &extensions)?;

    for rel in files {
        let has_server = rel.split('/').any(|seg| seg == "server");
        let has_client = rel.split('/').any(|seg| seg == "client");
        let in_tests = rel.split('/').any(|seg| seg == "tests");

        let wanted = match phase {
            HookPhase::Use => !in_tests,
            HookPhase::Test => in_tests,
        };
        if !wanted {
            continue;
        }

        let paths = [rel];
        if !has_server {
            api.add_files(&paths, &[Environment::Client])?;
        }
        if !has_client {
            api.add_files(&paths, &[Environment::Server])?;
        }
    }

    Ok(())
}

fn apply_collection_hook(
    api: &mut PackageApi<'_>,
    hook: &CollectionHook,
) -> Result<(), EngineError> {
    for dir in &hook.member_dirs {
        api.include_tests_at(dir)?;
    }
    Ok(())
}
