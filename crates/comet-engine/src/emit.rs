//! Bundle emission: lay out the self-contained application directory.
//!
//! Everything is built into a sibling scratch directory and atomically
//! renamed over the output path at the end. On failure the scratch tree is
//! left behind so watchers can still read dependency information.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;

use comet_config::project;
use comet_util::fs::{self, CopyOptions};
use comet_util::hash::{sha1_bytes, sha1_file};

use crate::bundle::{disk_rel, u64_len, Bundle, ManifestEntry, ManifestType};
use crate::error::EngineError;
use crate::package::Package;
use crate::registry::Registry;
use crate::sources;

/// How native-module directories are materialized into the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeModulesMode {
    /// Leave them out entirely (the runtime provides them another way).
    Skip,
    /// Symlink back to the source directories (development bundles).
    Symlink,
    /// Deep-copy them (self-contained deployment bundles).
    Copy,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown node_modules mode `{0}` (expected skip, symlink, or copy)")]
pub struct UnknownNodeModulesMode(pub String);

impl FromStr for NodeModulesMode {
    type Err = UnknownNodeModulesMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "symlink" => Ok(Self::Symlink),
            "copy" => Ok(Self::Copy),
            other => Err(UnknownNodeModulesMode(other.to_owned())),
        }
    }
}

const MAIN_JS: &str = "require(require(\"path\").join(__dirname, \"server\", \"server.js\")).run();\n";

const README: &str = "\
This is a bundled Comet application.

The bundle is self-contained apart from the node binary: run it with

    node main.js

and serve the static/ and static_cacheable/ trees per app.json.
";

const UNSUPPORTED_HTML: &str = "\
<!DOCTYPE html>
<html>
<head><title>Unsupported browser</title></head>
<body>
<p>Sorry, this application requires a browser with JavaScript enabled.</p>
</body>
</html>
";

#[derive(Serialize)]
struct AppJson<'a> {
    load: &'a [String],
    manifest: &'a [ManifestEntry],
}

#[derive(Serialize)]
struct DependenciesJson {
    extensions: Vec<String>,
    packages: BTreeMap<String, Vec<String>>,
    core: Vec<String>,
    app: Vec<String>,
    exclude: Vec<String>,
}

fn io_err(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::ensure_dir(parent)?;
    }
    std::fs::write(path, contents).map_err(|source| io_err(path, source))
}

fn materialize_modules(
    mode: NodeModulesMode,
    src: &Path,
    dest: &Path,
) -> Result<(), EngineError> {
    match mode {
        NodeModulesMode::Skip => Ok(()),
        NodeModulesMode::Symlink => Ok(fs::symlink_or_copy(src, dest)?),
        NodeModulesMode::Copy => Ok(fs::deep_copy(src, dest)?),
    }
}

/// Move a still-unminified client asset into the cacheable set with a
/// content-hash query parameter on its URL.
fn move_cache_busted(bundle: &mut Bundle, path: &str, kind: ManifestType) {
    let Some(bytes) = bundle.files.client.shift_remove(path) else {
        return;
    };
    let hash = sha1_bytes(&bytes);
    let size = u64_len(&bytes);
    bundle
        .files
        .client_cacheable
        .insert(path.to_owned(), bytes);
    bundle.manifest.push(ManifestEntry {
        path: path.to_owned(),
        where_: "client".to_owned(),
        kind,
        cacheable: true,
        url: format!("{path}?{hash}"),
        size,
        hash,
    });
}

fn render_app_html(css: &[&str], js: &[&str], head: &[String], body: &[String]) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    for url in css {
        out.push_str(&format!("  <link rel=\"stylesheet\" href=\"{url}\">\n"));
    }
    for url in js {
        out.push_str(&format!(
            "  <script type=\"text/javascript\" src=\"{url}\"></script>\n"
        ));
    }
    for fragment in head {
        out.push_str(fragment);
        if !fragment.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str("</head>\n<body>\n");
    for fragment in body {
        out.push_str(fragment);
        if !fragment.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str("</body>\n</html>\n");
    out
}

/// Serialize the bundle into `output`.
///
/// # Errors
/// Returns an error if any file operation fails; the scratch build
/// directory may be left in place for inspection.
pub(crate) fn write_to_directory(
    bundle: &mut Bundle,
    registry: &Registry,
    app: &Rc<Package>,
    output: &Path,
    project_dir: &Path,
    mode: NodeModulesMode,
) -> Result<(), EngineError> {
    // 1. Scratch directory next to the output path.
    let basename = output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::InvalidOutputPath {
            path: output.display().to_string(),
        })?;
    let parent: PathBuf = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let build_dir = parent.join(format!(".build.{basename}"));
    fs::remove_dir_all_if_exists(&build_dir)?;
    fs::ensure_dir(&build_dir)?;

    let ignore = sources::default_ignore()?;

    // 2. The framework's runtime server.
    let server_dir = build_dir.join("server");
    let mut runtime_ignore = ignore.clone();
    runtime_ignore.push(Regex::new("^node_modules$").map_err(|e| {
        EngineError::IgnorePattern {
            pattern: "^node_modules$".to_owned(),
            message: e.to_string(),
        }
    })?);
    fs::cp_r(
        registry.runtime_dir(),
        &server_dir,
        &CopyOptions {
            ignore: &runtime_ignore,
            ..CopyOptions::default()
        },
    )?;
    let core = vec!["server".to_owned()];

    // 3. Runtime native modules.
    let runtime_modules = registry.runtime_dir().join("node_modules");
    if runtime_modules.exists() {
        materialize_modules(mode, &runtime_modules, &server_dir.join("node_modules"))?;
    }

    // 4. The runtime's version marker rides along with the server.
    let version_marker = registry.runtime_dir().join(".bundle_version.txt");
    if version_marker.is_file() {
        std::fs::copy(&version_marker, server_dir.join(".bundle_version.txt"))
            .map_err(|source| io_err(&version_marker, source))?;
    }

    // 5. The app's public/ assets, served uncached at their own names.
    let static_dir = build_dir.join("static");
    if project::is_app_dir(project_dir) {
        let public = project_dir.join("public");
        if public.is_dir() {
            let copied = fs::cp_r(
                &public,
                &static_dir,
                &CopyOptions {
                    ignore: &ignore,
                    ..CopyOptions::default()
                },
            )?;
            for rel in copied {
                let url = format!("/{}", sources::forward_slashes(&rel));
                let on_disk = static_dir.join(&rel);
                let size = std::fs::metadata(&on_disk)
                    .map_err(|source| io_err(&on_disk, source))?
                    .len();
                let hash = sha1_file(&on_disk)?;
                bundle.manifest.push(ManifestEntry {
                    path: url.clone(),
                    where_: "client".to_owned(),
                    kind: ManifestType::Static,
                    cacheable: false,
                    url,
                    size,
                    hash,
                });
            }
        }
    }

    // 6. Client assets that were not minified away get cache-busting URLs.
    for path in std::mem::take(&mut bundle.js.client) {
        move_cache_busted(bundle, &path, ManifestType::Js);
    }
    for path in std::mem::take(&mut bundle.css) {
        move_cache_busted(bundle, &path, ManifestType::Css);
    }

    // 7. Remaining client files are static resources.
    let mut static_entries = Vec::new();
    for (serve_path, bytes) in &bundle.files.client {
        write_file(&static_dir.join(disk_rel(serve_path)), bytes)?;
        static_entries.push(ManifestEntry {
            path: serve_path.clone(),
            where_: "client".to_owned(),
            kind: ManifestType::Static,
            cacheable: false,
            url: serve_path.clone(),
            size: u64_len(bytes),
            hash: sha1_bytes(bytes),
        });
    }
    bundle.manifest.extend(static_entries);

    // 8. Content-addressed and query-busted assets.
    let cacheable_dir = build_dir.join("static_cacheable");
    for (serve_path, bytes) in &bundle.files.client_cacheable {
        write_file(&cacheable_dir.join(disk_rel(serve_path)), bytes)?;
    }

    // 9. Server code, in load order.
    let app_dir = build_dir.join("app");
    let mut load = Vec::new();
    for (serve_path, bytes) in &bundle.files.server {
        let rel = disk_rel(serve_path);
        write_file(&app_dir.join(rel), bytes)?;
        load.push(format!("app/{rel}"));
    }

    // 10. Per-package native modules.
    for (target_rel, src) in &bundle.node_modules_dirs {
        materialize_modules(mode, src, &build_dir.join(target_rel))?;
    }

    // 11. The client entry document.
    let css_urls: Vec<&str> = bundle
        .manifest
        .iter()
        .filter(|e| e.kind == ManifestType::Css)
        .map(|e| e.url.as_str())
        .collect();
    let js_urls: Vec<&str> = bundle
        .manifest
        .iter()
        .filter(|e| e.kind == ManifestType::Js)
        .map(|e| e.url.as_str())
        .collect();
    let app_html = render_app_html(&css_urls, &js_urls, &bundle.head, &bundle.body);
    write_file(&build_dir.join("app.html"), app_html.as_bytes())?;
    write_file(
        &build_dir.join("unsupported.html"),
        UNSUPPORTED_HTML.as_bytes(),
    )?;

    // 12. Entry point, README, and the two control documents.
    write_file(&build_dir.join("main.js"), MAIN_JS.as_bytes())?;
    write_file(&build_dir.join("README"), README.as_bytes())?;

    let app_json = serde_json::to_string_pretty(&AppJson {
        load: &load,
        manifest: &bundle.manifest,
    })
    .map_err(|source| EngineError::Serialize {
        what: "app.json".to_owned(),
        source,
    })?;
    write_file(&build_dir.join("app.json"), app_json.as_bytes())?;

    let dependencies = dependencies_json(bundle, app, core)?;
    write_file(&build_dir.join("dependencies.json"), dependencies.as_bytes())?;

    // 13. Atomic replacement of any previous bundle.
    if output.is_file() {
        std::fs::remove_file(output).map_err(|source| io_err(output, source))?;
    } else {
        fs::remove_dir_all_if_exists(output)?;
    }
    std::fs::rename(&build_dir, output).map_err(|source| io_err(&build_dir, source))?;

    Ok(())
}

fn dependencies_json(
    bundle: &Bundle,
    app: &Rc<Package>,
    core: Vec<String>,
) -> Result<String, EngineError> {
    let mut extensions: BTreeSet<String> = BTreeSet::new();
    let mut packages: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for info in bundle.infos.values() {
        extensions.extend(info.package.extensions().keys().cloned());
        if !info.package.name.is_empty() {
            packages.insert(
                info.package.name.clone(),
                info.dependencies.iter().cloned().collect(),
            );
        }
    }

    let mut app_deps: Vec<String> = bundle
        .info(app.id)
        .map(|info| info.dependencies.iter().cloned().collect())
        .unwrap_or_default();
    app_deps.push(project::PACKAGES_FILE.to_owned());

    let doc = DependenciesJson {
        extensions: extensions.into_iter().map(|ext| format!(".{ext}")).collect(),
        packages,
        core,
        app: app_deps,
        exclude: sources::IGNORE_PATTERNS
            .iter()
            .map(|p| (*p).to_owned())
            .collect(),
    };
    serde_json::to_string(&doc).map_err(|source| EngineError::Serialize {
        what: "dependencies.json".to_owned(),
        source,
    })
}
