//! Client-asset minification: concatenate, run the external minifier, and
//! emit one content-addressed file per resource type.
//!
//! The minifiers themselves are black boxes. Server JS is never minified.

use comet_util::hash::sha1_bytes;

use crate::bundle::{u64_len, Bundle, ManifestEntry, ManifestType};

/// External string → string minifiers.
pub struct Minifiers {
    pub js: Box<dyn Fn(&str) -> String>,
    pub css: Box<dyn Fn(&str) -> String>,
}

impl std::fmt::Debug for Minifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Minifiers")
    }
}

impl Minifiers {
    /// A conservative built-in: strips blank lines and trailing whitespace,
    /// leaving the code itself (including `debugger` statements) intact.
    pub fn whitespace() -> Self {
        fn strip(source: &str) -> String {
            let mut out = String::with_capacity(source.len());
            for line in source.lines() {
                let trimmed = line.trim_end();
                if trimmed.is_empty() {
                    continue;
                }
                out.push_str(trimmed);
                out.push('\n');
            }
            out
        }
        Self {
            js: Box::new(strip),
            css: Box::new(strip),
        }
    }
}

/// Separator between concatenated JS files; the leading statement
/// terminator isolates files that end without one.
const JS_SEPARATOR: &str = "\n;\n";

const CSS_SEPARATOR: &str = "\n";

/// Rewrite the bundle's client JS and CSS into single content-addressed
/// files.
///
/// After this runs, `js.client` and `css` are empty and exactly one
/// manifest entry per type exists, named `/<sha1>.js` and `/<sha1>.css`.
pub fn minify_bundle(bundle: &mut Bundle, minifiers: &Minifiers) {
    let js_paths = std::mem::take(&mut bundle.js.client);
    let joined = concat(bundle, &js_paths, JS_SEPARATOR);
    let minified = (minifiers.js)(&joined);
    emit_addressed(bundle, &js_paths, minified.into_bytes(), "js");

    let css_paths = std::mem::take(&mut bundle.css);
    let joined = concat(bundle, &css_paths, CSS_SEPARATOR);
    let minified = (minifiers.css)(&joined);
    emit_addressed(bundle, &css_paths, minified.into_bytes(), "css");
}

fn concat(bundle: &Bundle, paths: &[String], separator: &str) -> String {
    let pieces: Vec<String> = paths
        .iter()
        .filter_map(|path| bundle.files.client.get(path))
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .collect();
    pieces.join(separator)
}

fn emit_addressed(bundle: &mut Bundle, original_paths: &[String], bytes: Vec<u8>, ext: &str) {
    let hash = sha1_bytes(&bytes);
    let path = format!("/{hash}.{ext}");
    let size = u64_len(&bytes);

    for original in original_paths {
        bundle.files.client.shift_remove(original);
    }

    bundle
        .files
        .client_cacheable
        .insert(path.clone(), bytes);
    bundle.manifest.push(ManifestEntry {
        path: path.clone(),
        where_: "client".to_owned(),
        kind: if ext == "js" {
            ManifestType::Js
        } else {
            ManifestType::Css
        },
        cacheable: true,
        url: path,
        size,
        hash,
    });
}
