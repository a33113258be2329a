//! Built-in source transforms.
//!
//! A package binds a file extension to one of these by name in its
//! `[extensions]` table. This is the seam where real compilers (template
//! languages, CSS preprocessors, transpilers) would plug in; the built-ins
//! pass source bytes through to the matching resource type.

use std::path::Path;

use comet_config::Environment;

use crate::bundle::{Bundle, ResourceOptions, ResourceType};
use crate::error::EngineError;

/// A named, built-in source transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Emit the file as a JavaScript resource at its serve path.
    Js,
    /// Emit the file as a client stylesheet.
    Css,
    /// Splice the file's contents into the document `<head>`.
    HeadHtml,
    /// Splice the file's contents into the document `<body>`.
    BodyHtml,
}

impl Transform {
    /// Resolve a manifest transform name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "js" => Some(Self::Js),
            "css" => Some(Self::Css),
            "head-html" => Some(Self::HeadHtml),
            "body-html" => Some(Self::BodyHtml),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Css => "css",
            Self::HeadHtml => "head-html",
            Self::BodyHtml => "body-html",
        }
    }

    /// Run the transform over one source file, emitting resources into the
    /// bundle.
    ///
    /// # Errors
    /// Returns an error if the source cannot be read or the resource is
    /// rejected by the bundle.
    pub fn apply(
        self,
        bundle: &mut Bundle,
        source: &Path,
        serve_path: &str,
        where_: &[Environment],
    ) -> Result<(), EngineError> {
        let kind = match self {
            Self::Js => ResourceType::Js,
            Self::Css => ResourceType::Css,
            Self::HeadHtml => ResourceType::Head,
            Self::BodyHtml => ResourceType::Body,
        };
        // Document fragments only exist client-side; when the same source
        // file is also routed to the server tree, that routing is a no-op.
        let where_: Vec<Environment> = match self {
            Self::HeadHtml | Self::BodyHtml => where_
                .iter()
                .copied()
                .filter(|env| *env == Environment::Client)
                .collect(),
            Self::Js | Self::Css => where_.to_vec(),
        };
        if where_.is_empty() {
            return Ok(());
        }
        bundle.add_resource(ResourceOptions {
            kind,
            where_,
            path: Some(serve_path.to_owned()),
            data: None,
            source_file: Some(source.to_path_buf()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for t in [
            Transform::Js,
            Transform::Css,
            Transform::HeadHtml,
            Transform::BodyHtml,
        ] {
            assert_eq!(Transform::from_name(t.name()), Some(t));
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(Transform::from_name("coffee"), None);
        assert_eq!(Transform::from_name(""), None);
    }
}
