//! tar.gz extraction and creation for package archives.
//!
//! A package archive's top-level entry is the package directory itself,
//! so extraction lands everything under `<dest>/<top-level>/` and creation
//! packs a directory back under a single top-level name.

use std::path::{Component, Path};

use crate::error::UtilError;

fn archive_err(path: &Path, message: impl Into<String>) -> UtilError {
    UtilError::Archive {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// Extract a gzip'd tarball into `dest`.
///
/// Entries that would escape `dest` (absolute paths or `..` traversal) are
/// rejected rather than unpacked.
///
/// # Errors
/// Returns an error if the archive cannot be read, an entry escapes the
/// destination, or an entry cannot be written.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), UtilError> {
    crate::fs::ensure_dir(dest)?;

    let file = std::fs::File::open(archive).map_err(|source| UtilError::Io {
        path: archive.display().to_string(),
        source,
    })?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut tarball = tar::Archive::new(decoder);

    let entries = tarball
        .entries()
        .map_err(|e| archive_err(archive, e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| archive_err(archive, e.to_string()))?;
        let rel = entry
            .path()
            .map_err(|e| archive_err(archive, e.to_string()))?
            .into_owned();

        if rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        }) {
            return Err(UtilError::ArchiveEscape {
                entry: rel.display().to_string(),
                root: dest.display().to_string(),
            });
        }

        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            crate::fs::ensure_dir(parent)?;
        }
        entry
            .unpack(&target)
            .map_err(|e| archive_err(archive, e.to_string()))?;
    }

    Ok(())
}

/// Pack `src_dir` into a gzip'd tarball at `archive`, with every entry
/// placed under the single top-level directory `top_level`.
///
/// # Errors
/// Returns an error if the directory cannot be read or the archive cannot
/// be written.
pub fn create_tar_gz(src_dir: &Path, archive: &Path, top_level: &str) -> Result<(), UtilError> {
    if let Some(parent) = archive.parent() {
        crate::fs::ensure_dir(parent)?;
    }

    let file = std::fs::File::create(archive).map_err(|source| UtilError::Io {
        path: archive.display().to_string(),
        source,
    })?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    builder
        .append_dir_all(top_level, src_dir)
        .map_err(|e| archive_err(archive, e.to_string()))?;

    let encoder = builder
        .into_inner()
        .map_err(|e| archive_err(archive, e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| archive_err(archive, e.to_string()))?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn round_trip_preserves_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = tmp.path().join("store");
        fs::create_dir_all(pkg.join("lib")).unwrap();
        fs::write(pkg.join("package.toml"), b"summary = \"kv\"").unwrap();
        fs::write(pkg.join("lib").join("store.js"), b"// store").unwrap();

        let archive = tmp.path().join("store-1.0.0.tar.gz");
        create_tar_gz(&pkg, &archive, "store").unwrap();

        let out = tmp.path().join("out");
        extract_tar_gz(&archive, &out).unwrap();

        assert_eq!(
            fs::read(out.join("store").join("package.toml")).unwrap(),
            b"summary = \"kv\""
        );
        assert_eq!(
            fs::read(out.join("store").join("lib").join("store.js")).unwrap(),
            b"// store"
        );
    }

    #[test]
    fn extract_missing_archive_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let result = extract_tar_gz(&tmp.path().join("absent.tar.gz"), tmp.path());
        assert!(result.is_err());
    }

    #[test]
    fn extract_rejects_parent_traversal() {
        let tmp = tempfile::tempdir().unwrap();

        // Hand-build a tarball whose entry path climbs out of the root.
        let archive = tmp.path().join("evil.tar.gz");
        let file = fs::File::create(&archive).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        // Bypass `set_path`'s `..` rejection by writing the raw name bytes
        // directly, so this still exercises a maliciously-crafted archive
        // rather than one the writer itself would now refuse to produce.
        if let Some(gnu) = header.as_gnu_mut() {
            let name = b"../escape.txt";
            gnu.name[..name.len()].copy_from_slice(name);
        }
        header.set_cksum();
        builder.append(&header, &b"oops"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let out = tmp.path().join("out");
        let result = extract_tar_gz(&archive, &out);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("escapes"), "error was: {err}");
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn extract_corrupt_archive_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("corrupt.tar.gz");
        fs::write(&archive, b"this is not a tarball").unwrap();

        let result = extract_tar_gz(&archive, &tmp.path().join("out"));
        assert!(result.is_err());
    }
}
