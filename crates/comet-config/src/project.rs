//! Project-directory signals and the `.comet/` control files.
//!
//! An **app** directory contains `.comet/packages` as a regular file.
//! A **package** directory contains `package.toml`.
//! A **collection** directory has at least one subdirectory and every
//! immediate subdirectory is a package directory.

use std::path::Path;

/// Per-project packages list, relative to the app directory.
pub const PACKAGES_FILE: &str = ".comet/packages";

/// Optional release pin, relative to the app directory.
pub const RELEASE_FILE: &str = ".comet/release";

/// The package manifest filename.
pub const MANIFEST_FILE: &str = "package.toml";

/// Errors raised while probing a project directory.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path} is not a Comet app directory (missing {PACKAGES_FILE})")]
    NotAnApp { path: String },
}

/// True if `dir` is an app directory.
pub fn is_app_dir(dir: &Path) -> bool {
    dir.join(PACKAGES_FILE).is_file()
}

/// True if `dir` is a package directory.
pub fn is_package_dir(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).is_file()
}

/// True if `dir` is a collection: a directory with at least one
/// subdirectory, all of whose immediate subdirectories are packages.
pub fn is_collection_dir(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    let mut seen_any = false;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            seen_any = true;
            if !is_package_dir(&path) {
                return false;
            }
        }
    }
    seen_any
}

/// Read the package names declared in `.comet/packages`: one name per
/// line, `#` starts a comment, blank lines ignored.
///
/// # Errors
/// Returns [`ProjectError::NotAnApp`] if the file is missing, or an I/O
/// error if it cannot be read.
pub fn read_project_packages(app_dir: &Path) -> Result<Vec<String>, ProjectError> {
    let path = app_dir.join(PACKAGES_FILE);
    if !path.is_file() {
        return Err(ProjectError::NotAnApp {
            path: app_dir.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(&path).map_err(|source| ProjectError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut names = Vec::new();
    for line in content.lines() {
        let name = line.split('#').next().unwrap_or("").trim();
        if !name.is_empty() {
            names.push(name.to_owned());
        }
    }
    Ok(names)
}

/// Read the optional `.comet/release` pin.
///
/// # Errors
/// Returns an I/O error if the file exists but cannot be read.
pub fn read_project_release(app_dir: &Path) -> Result<Option<String>, ProjectError> {
    let path = app_dir.join(RELEASE_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let version = content.trim();
            if version.is_empty() {
                Ok(None)
            } else {
                Ok(Some(version.to_owned()))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ProjectError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn make_app(dir: &Path, packages: &str) {
        fs::create_dir_all(dir.join(".comet")).unwrap();
        fs::write(dir.join(PACKAGES_FILE), packages).unwrap();
    }

    fn make_package(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), "").unwrap();
    }

    #[test]
    fn app_dir_signal() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_app_dir(tmp.path()));
        make_app(tmp.path(), "");
        assert!(is_app_dir(tmp.path()));
    }

    #[test]
    fn app_signal_requires_regular_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join(PACKAGES_FILE)).unwrap();
        assert!(!is_app_dir(tmp.path()));
    }

    #[test]
    fn package_dir_signal() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_package_dir(tmp.path()));
        make_package(tmp.path());
        assert!(is_package_dir(tmp.path()));
    }

    #[test]
    fn collection_signal_all_subdirs_packages() {
        let tmp = tempfile::tempdir().unwrap();
        make_package(&tmp.path().join("alpha"));
        make_package(&tmp.path().join("beta"));
        assert!(is_collection_dir(tmp.path()));

        fs::create_dir_all(tmp.path().join("not-a-package")).unwrap();
        assert!(!is_collection_dir(tmp.path()));
    }

    #[test]
    fn empty_dir_is_not_a_collection() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_collection_dir(tmp.path()));
    }

    #[test]
    fn read_packages_skips_comments_and_blanks() {
        let tmp = tempfile::tempdir().unwrap();
        make_app(
            tmp.path(),
            "# core set\nstore\n\nsessions  # inline comment\n",
        );
        let names = read_project_packages(tmp.path()).unwrap();
        assert_eq!(names, vec!["store", "sessions"]);
    }

    #[test]
    fn read_packages_missing_file_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let result = read_project_packages(tmp.path());
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("not a Comet app"), "error was: {err}");
    }

    #[test]
    fn read_release_absent_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_project_release(tmp.path()).unwrap(), None);
    }

    #[test]
    fn read_release_trims_whitespace() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join(".comet")).unwrap();
        fs::write(tmp.path().join(RELEASE_FILE), "0.9.2\n").unwrap();
        assert_eq!(
            read_project_release(tmp.path()).unwrap().as_deref(),
            Some("0.9.2")
        );
    }
}
