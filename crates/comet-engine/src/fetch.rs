//! The package cache fetcher: pull a release manifest and every package
//! archive it pins from the remote origin into the local cache.
//!
//! Downloads of missing archives run in parallel; extraction fans in and
//! runs sequentially. A failed download is fatal with no per-fetch retry.

use std::path::{Path, PathBuf};

use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

use comet_config::project;
use comet_config::ReleaseManifest;
use comet_util::{archive, download, fs as util_fs, UtilError};

use crate::error::EngineError;
use crate::registry::Registry;

/// Reject names and versions that could climb out of the cache tree or
/// break the origin URL.
fn validate_component(label: &str, value: &str) -> Result<(), EngineError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(EngineError::Util(UtilError::InvalidVersion {
            version: format!("{label} `{value}`"),
        }))
    }
}

/// Where a release manifest is cached. The same path is used by the writer
/// and the reader.
pub fn manifest_cache_path(registry: &Registry, version: &str) -> PathBuf {
    registry
        .cache_dir()
        .join("manifest")
        .join(format!("{version}.json"))
}

fn package_present(registry: &Registry, name: &str, version: &str) -> bool {
    // An empty slot left by a failed untar must not count as present.
    project::is_package_dir(&registry.cache_slot(name, version))
}

struct DownloadPlan {
    name: String,
    version: String,
    url: String,
    tarball: PathBuf,
}

/// Fetch `<origin>/manifest/<version>.json`, persist it into the cache,
/// and download + extract every pinned package archive that is absent.
///
/// # Errors
/// Returns an error if the manifest or any archive cannot be fetched,
/// parsed, or extracted.
pub fn populate_cache_for_release(
    registry: &Registry,
    version: &str,
) -> Result<ReleaseManifest, EngineError> {
    validate_component("release version", version)?;

    let manifest_url = format!("{}/manifest/{version}.json", registry.origin());
    let bytes = download::fetch_bytes(&manifest_url)?;
    let manifest = ReleaseManifest::from_json_bytes(version, &bytes)?;

    let cache_path = manifest_cache_path(registry, version);
    if let Some(parent) = cache_path.parent() {
        util_fs::ensure_dir(parent)?;
    }
    std::fs::write(&cache_path, &bytes).map_err(|source| EngineError::Io {
        path: cache_path.display().to_string(),
        source,
    })?;

    // Plan the downloads up front so the parallel stage shares nothing.
    let mut plan: Vec<DownloadPlan> = Vec::new();
    for (name, pkg_version) in &manifest.packages {
        validate_component("package name", name)?;
        validate_component("package version", pkg_version)?;
        if package_present(registry, name, pkg_version) {
            continue;
        }
        plan.push(DownloadPlan {
            name: name.clone(),
            version: pkg_version.clone(),
            url: format!("{}/packages/{name}/{pkg_version}.tar.gz", registry.origin()),
            tarball: PathBuf::new(), // filled below, under the scratch dir
        });
    }
    if plan.is_empty() {
        return Ok(manifest);
    }

    // Scratch space inside the cache so the final renames stay on one
    // filesystem.
    let scratch = registry
        .cache_dir()
        .join(format!(".tmp-fetch-{}", std::process::id()));
    util_fs::ensure_dir(&scratch)?;
    for item in &mut plan {
        item.tarball = scratch.join(format!("{}-{}.tar.gz", item.name, item.version));
    }

    let downloads: Vec<Result<(), EngineError>> = plan
        .par_iter()
        .map(|item| {
            download::download_to_file(
                &item.url,
                &item.tarball,
                &format!("{} {}", item.name, item.version),
            )?;
            Ok(())
        })
        .collect();
    let failed = downloads.into_iter().collect::<Result<Vec<()>, _>>();
    if let Err(e) = failed {
        let _ = std::fs::remove_dir_all(&scratch);
        return Err(e);
    }

    for item in &plan {
        install_package(registry, &item.name, &item.version, &item.tarball, &scratch)?;
    }

    let _ = std::fs::remove_dir_all(&scratch);
    Ok(manifest)
}

/// Extract one downloaded archive into its cache slot. The archive's
/// single top-level directory becomes the slot contents.
fn install_package(
    registry: &Registry,
    name: &str,
    version: &str,
    tarball: &Path,
    scratch: &Path,
) -> Result<(), EngineError> {
    let extract_dir = scratch.join(format!(".extract-{name}-{version}"));
    util_fs::remove_dir_all_if_exists(&extract_dir)?;
    archive::extract_tar_gz(tarball, &extract_dir)?;

    let root = find_extracted_root(&extract_dir)?;

    let slot = registry.cache_slot(name, version);
    util_fs::remove_dir_all_if_exists(&slot)?;
    if let Some(parent) = slot.parent() {
        util_fs::ensure_dir(parent)?;
    }
    std::fs::rename(&root, &slot).map_err(|source| EngineError::Io {
        path: slot.display().to_string(),
        source,
    })?;

    util_fs::remove_dir_all_if_exists(&extract_dir)?;
    Ok(())
}

fn find_extracted_root(extract_dir: &Path) -> Result<PathBuf, EngineError> {
    let entries = std::fs::read_dir(extract_dir).map_err(|source| EngineError::Io {
        path: extract_dir.display().to_string(),
        source,
    })?;
    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| EngineError::Io {
            path: extract_dir.display().to_string(),
            source,
        })?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    if dirs.len() == 1 {
        dirs.pop().ok_or_else(|| unreachable_archive(extract_dir))
    } else {
        Err(unreachable_archive(extract_dir))
    }
}

fn unreachable_archive(extract_dir: &Path) -> EngineError {
    EngineError::Util(UtilError::Archive {
        path: extract_dir.display().to_string(),
        message: "package archive must contain exactly one top-level directory".to_owned(),
    })
}

/// Read the cached manifest for `version`, fetching and populating the
/// cache first when it is absent.
///
/// # Errors
/// Returns an error if the cached document is unreadable or the fetch
/// fails.
pub fn load_release_manifest(
    registry: &Registry,
    version: &str,
) -> Result<ReleaseManifest, EngineError> {
    validate_component("release version", version)?;
    let path = manifest_cache_path(registry, version);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(ReleaseManifest::from_json_bytes(version, &bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            populate_cache_for_release(registry, version)
        }
        Err(source) => Err(EngineError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}
