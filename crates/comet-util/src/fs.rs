//! Filesystem utilities for the Comet bundler.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::UtilError;

fn io_err(path: &Path, source: std::io::Error) -> UtilError {
    UtilError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| io_err(path, source))
}

/// Remove a directory and all its contents. No error if the directory is absent.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_err(path, source)),
    }
}

/// Options for [`cp_r`].
///
/// `ignore` patterns are matched against entry basenames; a matching file is
/// skipped and a matching directory is skipped with its whole subtree.
/// The filename transform applies to file basenames only; the contents
/// transform receives the bytes and the (transformed) basename.
#[derive(Default)]
pub struct CopyOptions<'a> {
    pub ignore: &'a [Regex],
    pub transform_filename: Option<&'a dyn Fn(&str) -> String>,
    pub transform_contents: Option<&'a dyn Fn(Vec<u8>, &str) -> Vec<u8>>,
}

/// Recursively copy `src` into `dest`, applying the given options.
///
/// Returns the destination-relative paths of every file written, in
/// traversal order (directories sorted by name for determinism).
///
/// # Errors
/// Returns an error if `src` cannot be read or any entry cannot be written.
pub fn cp_r(src: &Path, dest: &Path, options: &CopyOptions<'_>) -> Result<Vec<PathBuf>, UtilError> {
    ensure_dir(dest)?;
    let mut copied = Vec::new();
    cp_r_inner(src, dest, options, PathBuf::new(), &mut copied)?;
    Ok(copied)
}

fn cp_r_inner(
    src: &Path,
    dest: &Path,
    options: &CopyOptions<'_>,
    rel: PathBuf,
    copied: &mut Vec<PathBuf>,
) -> Result<(), UtilError> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(src)
        .map_err(|source| io_err(src, source))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(|source| io_err(src, source))?;
    entries.sort();

    for path in entries {
        let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if options.ignore.iter().any(|re| re.is_match(base)) {
            continue;
        }

        if path.is_dir() {
            let sub_dest = dest.join(base);
            ensure_dir(&sub_dest)?;
            cp_r_inner(&path, &sub_dest, options, rel.join(base), copied)?;
        } else {
            let name = match options.transform_filename {
                Some(transform) => transform(base),
                None => base.to_owned(),
            };
            let mut contents = std::fs::read(&path).map_err(|source| io_err(&path, source))?;
            if let Some(transform) = options.transform_contents {
                contents = transform(contents, &name);
            }
            let target = dest.join(&name);
            std::fs::write(&target, contents).map_err(|source| io_err(&target, source))?;
            copied.push(rel.join(&name));
        }
    }

    Ok(())
}

/// Walk upward from `start`, returning the first ancestor directory (including
/// `start` itself) that contains an entry named `name`.
pub fn find_upwards(start: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(name).exists() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

/// Append `entry` as a line to `dir/.gitignore`, creating the file if needed.
/// Does nothing if the entry is already present.
///
/// # Errors
/// Returns an error if the file cannot be read or written.
pub fn append_to_gitignore(dir: &Path, entry: &str) -> Result<(), UtilError> {
    let path = dir.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => return Err(io_err(&path, source)),
    };

    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(entry);
    updated.push('\n');
    std::fs::write(&path, updated).map_err(|source| io_err(&path, source))
}

/// Link `src` into `dest` as a symlink, falling back to a deep copy on
/// platforms or filesystems without symlink support.
///
/// # Errors
/// Returns an error if neither linking nor copying succeeds.
pub fn symlink_or_copy(src: &Path, dest: &Path) -> Result<(), UtilError> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }

    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(src, dest).is_ok() {
            return Ok(());
        }
    }

    deep_copy(src, dest)
}

/// Copy `src` (file or directory) to `dest` without transforms.
///
/// # Errors
/// Returns an error if the copy fails.
pub fn deep_copy(src: &Path, dest: &Path) -> Result<(), UtilError> {
    if src.is_dir() {
        cp_r(src, dest, &CopyOptions::default())?;
        Ok(())
    } else {
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        std::fs::copy(src, dest)
            .map(|_| ())
            .map_err(|source| io_err(dest, source))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b").join("c");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn remove_dir_all_if_exists_absent_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        remove_dir_all_if_exists(&tmp.path().join("nonexistent")).unwrap();
    }

    #[test]
    fn remove_dir_all_if_exists_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("target");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("file.txt"), b"x").unwrap();

        remove_dir_all_if_exists(&dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn cp_r_copies_tree_and_reports_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();
        fs::write(src.join("sub").join("b.txt"), b"b").unwrap();

        let dest = tmp.path().join("dest");
        let copied = cp_r(&src, &dest, &CopyOptions::default()).unwrap();

        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(dest.join("sub").join("b.txt")).unwrap(), b"b");
        assert_eq!(
            copied,
            vec![PathBuf::from("a.txt"), PathBuf::from("sub").join("b.txt")]
        );
    }

    #[test]
    fn cp_r_skips_ignored_subtrees() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join(".git")).unwrap();
        fs::write(src.join(".git").join("HEAD"), b"ref").unwrap();
        fs::write(src.join("kept.txt"), b"k").unwrap();
        fs::write(src.join("skipped~"), b"s").unwrap();

        let ignore = vec![
            regex::Regex::new(r"^\.git$").unwrap(),
            regex::Regex::new(r"~$").unwrap(),
        ];
        let dest = tmp.path().join("dest");
        let copied = cp_r(
            &src,
            &dest,
            &CopyOptions {
                ignore: &ignore,
                ..CopyOptions::default()
            },
        )
        .unwrap();

        assert_eq!(copied, vec![PathBuf::from("kept.txt")]);
        assert!(!dest.join(".git").exists());
        assert!(!dest.join("skipped~").exists());
    }

    #[test]
    fn cp_r_applies_transforms() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("app.js.in"), b"name = @@NAME@@").unwrap();

        let rename = |base: &str| base.trim_end_matches(".in").to_owned();
        let substitute = |bytes: Vec<u8>, _name: &str| {
            String::from_utf8_lossy(&bytes)
                .replace("@@NAME@@", "demo")
                .into_bytes()
        };

        let dest = tmp.path().join("dest");
        let copied = cp_r(
            &src,
            &dest,
            &CopyOptions {
                ignore: &[],
                transform_filename: Some(&rename),
                transform_contents: Some(&substitute),
            },
        )
        .unwrap();

        assert_eq!(copied, vec![PathBuf::from("app.js")]);
        assert_eq!(fs::read(dest.join("app.js")).unwrap(), b"name = demo");
    }

    #[test]
    fn find_upwards_locates_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let project = tmp.path().join("project");
        let deep = project.join("a").join("b");
        fs::create_dir_all(&deep).unwrap();
        fs::create_dir_all(project.join(".comet")).unwrap();

        let found = find_upwards(&deep, ".comet").unwrap();
        assert_eq!(found, project);
    }

    #[test]
    fn find_upwards_missing_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_upwards(tmp.path(), ".does-not-exist").is_none());
    }

    #[test]
    fn append_to_gitignore_creates_and_dedupes() {
        let tmp = tempfile::tempdir().unwrap();

        append_to_gitignore(tmp.path(), ".build*").unwrap();
        append_to_gitignore(tmp.path(), ".build*").unwrap();
        append_to_gitignore(tmp.path(), "node_modules").unwrap();

        let contents = fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert_eq!(contents, ".build*\nnode_modules\n");
    }

    #[test]
    fn append_to_gitignore_preserves_existing_lines() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".gitignore"), "target").unwrap();

        append_to_gitignore(tmp.path(), ".build*").unwrap();

        let contents = fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert_eq!(contents, "target\n.build*\n");
    }

    #[test]
    fn symlink_or_copy_materializes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("modules");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("index.js"), b"module.exports = {};").unwrap();

        let dest = tmp.path().join("out").join("modules");
        symlink_or_copy(&src, &dest).unwrap();

        assert_eq!(
            fs::read(dest.join("index.js")).unwrap(),
            b"module.exports = {};"
        );
    }
}
