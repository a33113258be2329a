//! Blocking HTTP GET with progress reporting and SHA-1 hashing.

use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::UtilError;

fn agent() -> ureq::Agent {
    ureq::Agent::new_with_config(
        ureq::config::Config::builder()
            .timeout_connect(Some(std::time::Duration::from_secs(30)))
            .timeout_global(Some(std::time::Duration::from_secs(600)))
            .build(),
    )
}

/// Convert `usize` to `u64`. Infallible on 32-bit and 64-bit platforms.
fn u64_from_usize(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Compute download percentage as a `u8` (0..=100).
///
/// Returns 0 when `total` is 0 to avoid division by zero.
fn pct_u8(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    u8::try_from((downloaded * 100) / total).unwrap_or(100)
}

/// GET a URL into memory (for small documents like release manifests).
///
/// # Errors
/// Returns an error if the request fails or the body cannot be read.
pub fn fetch_bytes(url: &str) -> Result<Vec<u8>, UtilError> {
    let response = agent().get(url).call().map_err(|e| UtilError::Download {
        url: url.to_owned(),
        message: e.to_string(),
    })?;

    let mut body = Vec::new();
    std::io::Read::read_to_end(&mut response.into_body().as_reader(), &mut body).map_err(|e| {
        UtilError::Download {
            url: url.to_owned(),
            message: e.to_string(),
        }
    })?;
    Ok(body)
}

/// Download a URL to a file, showing progress on stderr and computing SHA-1.
///
/// Returns the hex-encoded SHA-1 hash of the downloaded content.
///
/// # Errors
/// Returns an error if the HTTP request fails, the file cannot be written,
/// or a read error occurs during streaming.
pub fn download_to_file(url: &str, dest: &Path, label: &str) -> Result<String, UtilError> {
    let response = agent().get(url).call().map_err(|e| UtilError::Download {
        url: url.to_owned(),
        message: e.to_string(),
    })?;

    let content_length: Option<u64> = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());

    let mut body = response.into_body();
    let mut file = std::fs::File::create(dest).map_err(|source| UtilError::Io {
        path: dest.display().to_string(),
        source,
    })?;

    let mut hasher = Sha1::new();
    let mut downloaded: u64 = 0;
    let mut last_pct: u8 = 0;
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = std::io::Read::read(&mut body.as_reader(), &mut buf).map_err(|e| {
            UtilError::Download {
                url: url.to_owned(),
                message: e.to_string(),
            }
        })?;
        if n == 0 {
            break;
        }

        let Some(chunk) = buf.get(..n) else {
            break; // unreachable: n is bounded by buf.len()
        };
        std::io::Write::write_all(&mut file, chunk).map_err(|source| UtilError::Io {
            path: dest.display().to_string(),
            source,
        })?;
        hasher.update(chunk);

        downloaded = downloaded.saturating_add(u64_from_usize(n));

        if let Some(total) = content_length {
            if total > 0 {
                let pct = pct_u8(downloaded, total);
                if pct != last_pct && pct.is_multiple_of(10) {
                    eprint!("\r    Downloading {label}... {pct}%");
                    last_pct = pct;
                }
            }
        }
    }

    if content_length.is_some() {
        eprintln!("\r    Downloading {label}... done   ");
    } else {
        let kb = downloaded / 1024;
        eprintln!("    Downloaded {label} ({kb} KB)");
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{pct_u8, u64_from_usize};

    #[test]
    fn pct_u8_zero_total_returns_zero() {
        assert_eq!(pct_u8(0, 0), 0);
        assert_eq!(pct_u8(100, 0), 0);
    }

    #[test]
    fn pct_u8_basic_percentages() {
        assert_eq!(pct_u8(0, 100), 0);
        assert_eq!(pct_u8(50, 100), 50);
        assert_eq!(pct_u8(100, 100), 100);
    }

    #[test]
    fn pct_u8_overflow_clamps() {
        assert_eq!(pct_u8(1000, 100), 100); // 1000% overflows u8 → clamps
    }

    #[test]
    fn u64_from_usize_roundtrips() {
        assert_eq!(u64_from_usize(0), 0);
        assert_eq!(u64_from_usize(1024), 1024);
    }

    #[test]
    fn fetch_bytes_unreachable_host_errors() {
        let result = super::fetch_bytes("http://127.0.0.1:1/manifest.json");
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("download failed"), "error was: {err}");
    }

    #[test]
    fn download_invalid_url_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("out.tar.gz");
        let result = super::download_to_file("http://127.0.0.1:1/nonexistent", &dest, "test");
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("download failed"), "error was: {err}");
    }
}
