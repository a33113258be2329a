//! Source enumeration and the deterministic load order.
//!
//! Enumeration walks a package's source root depth-first, keeping files
//! whose extension is recognized. The load order governs how the runtime
//! loads server code: `main.*` files last, `lib/` code first, deeper paths
//! before shallower ones, alphabetical within a tier, and `.html` files
//! hoisted to the front so template declarations exist before the code
//! that references them.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::error::EngineError;

/// Basename patterns excluded from every source walk: editor droppings,
/// OS metadata, and the framework's own control directories.
pub const IGNORE_PATTERNS: [&str; 9] = [
    r"~$",
    r"^\.#",
    r"^#.*#$",
    r"^\.DS_Store$",
    r"^ehthumbs\.db$",
    r"^Icon.$",
    r"^Thumbs\.db$",
    r"^\.comet$",
    r"^\.git$",
];

/// Compile the built-in ignore patterns.
///
/// # Errors
/// Returns an error if a pattern fails to compile.
pub fn default_ignore() -> Result<Vec<Regex>, EngineError> {
    IGNORE_PATTERNS
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| EngineError::IgnorePattern {
                pattern: (*pattern).to_owned(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// The app's static-asset directory, excluded from source walks and copied
/// into the bundle separately.
const PUBLIC_DIR: &str = "public";

fn skip_entry(basename: &str) -> bool {
    basename.starts_with('.') || basename == PUBLIC_DIR
}

/// Recursively enumerate files under `root` whose extension is in
/// `extensions`, skipping dot-entries, `public`, and basenames matching any
/// ignore pattern. Read errors surface rather than silently pruning the
/// walk.
///
/// # Errors
/// Returns an error if a directory cannot be read.
pub fn enumerate(
    root: &Path,
    extensions: &BTreeSet<String>,
    ignore: &[Regex],
) -> Result<Vec<PathBuf>, EngineError> {
    let mut files = Vec::new();
    enumerate_inner(root, extensions, ignore, &mut files)?;
    Ok(files)
}

fn enumerate_inner(
    dir: &Path,
    extensions: &BTreeSet<String>,
    ignore: &[Regex],
    out: &mut Vec<PathBuf>,
) -> Result<(), EngineError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EngineError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| EngineError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        paths.push(entry.path());
    }
    paths.sort();

    for path in paths {
        let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if skip_entry(base) || ignore.iter().any(|re| re.is_match(base)) {
            continue;
        }

        if path.is_dir() {
            enumerate_inner(&path, extensions, ignore, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(e))
        {
            out.push(path);
        }
    }

    Ok(())
}

fn is_main(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("main."))
}

fn has_lib_segment(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "lib")
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

/// The load-order comparator: a strict total order over paths.
///
/// Earlier-loaded sorts first. `main.*` basenames sort last; of the rest,
/// paths containing a `lib` segment sort first; then deeper paths; then
/// alphabetical on the full path.
pub fn load_order(a: &Path, b: &Path) -> Ordering {
    is_main(a)
        .cmp(&is_main(b))
        .then_with(|| has_lib_segment(b).cmp(&has_lib_segment(a)))
        .then_with(|| depth(b).cmp(&depth(a)))
        .then_with(|| a.cmp(b))
}

/// Sort files into load order, then hoist `.html` files to the head of the
/// list while preserving their mutual order.
pub fn order_sources(mut files: Vec<PathBuf>) -> Vec<PathBuf> {
    files.sort_by(|a, b| load_order(a, b));
    let (html, rest): (Vec<PathBuf>, Vec<PathBuf>) = files
        .into_iter()
        .partition(|p| p.extension().and_then(|e| e.to_str()) == Some("html"));
    let mut ordered = html;
    ordered.extend(rest);
    ordered
}

/// Convert absolute paths into forward-slash paths relative to `root`.
///
/// # Errors
/// Returns an error if any path does not live under `root`.
pub fn relativize(root: &Path, files: &[PathBuf]) -> Result<Vec<String>, EngineError> {
    files
        .iter()
        .map(|path| {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| EngineError::SourceOutsideRoot {
                    path: path.display().to_string(),
                    root: root.display().to_string(),
                })?;
            if rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(EngineError::SourceOutsideRoot {
                    path: path.display().to_string(),
                    root: root.display().to_string(),
                });
            }
            Ok(forward_slashes(rel))
        })
        .collect()
}

/// Render a relative path with forward slashes on every host OS.
pub fn forward_slashes(path: &Path) -> String {
    let parts: Vec<&str> = path
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    parts.join("/")
}

/// Enumerate, order, and relativize a package's sources in one step.
///
/// # Errors
/// Returns an error if the walk fails or a file escapes `root`.
pub fn package_sources(root: &Path, extensions: &BTreeSet<String>) -> Result<Vec<String>, EngineError> {
    let ignore = default_ignore()?;
    let files = enumerate(root, extensions, &ignore)?;
    relativize(root, &order_sources(files))
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod proptests {
    use std::cmp::Ordering;
    use std::path::PathBuf;

    use proptest::prelude::{prop, prop_assert, prop_assert_eq, proptest, Strategy};

    use super::{load_order, order_sources};

    fn any_rel_path() -> impl proptest::strategy::Strategy<Value = PathBuf> {
        prop::collection::vec("[a-z]{1,6}(\\.(js|html|css))?", 1..4)
            .prop_map(|segments| segments.join("/").into())
    }

    proptest! {
        /// The comparator is a strict total order: antisymmetric and
        /// consistent with equality.
        #[test]
        fn comparator_is_antisymmetric(a in any_rel_path(), b in any_rel_path()) {
            let ab = load_order(&a, &b);
            let ba = load_order(&b, &a);
            prop_assert_eq!(ab, ba.reverse());
            if a == b {
                prop_assert_eq!(ab, Ordering::Equal);
            }
        }

        /// Sorting is idempotent.
        #[test]
        fn ordering_is_idempotent(files in prop::collection::vec(any_rel_path(), 0..12)) {
            let once = order_sources(files);
            let twice = order_sources(once.clone());
            prop_assert_eq!(once, twice);
        }

        /// Every html file precedes every non-html file.
        #[test]
        fn html_always_first(files in prop::collection::vec(any_rel_path(), 0..12)) {
            let ordered = order_sources(files);
            let first_non_html = ordered
                .iter()
                .position(|p| p.extension().and_then(|e| e.to_str()) != Some("html"));
            if let Some(boundary) = first_non_html {
                prop_assert!(ordered
                    .iter()
                    .skip(boundary)
                    .all(|p| p.extension().and_then(|e| e.to_str()) != Some("html")));
            }
        }
    }
}
