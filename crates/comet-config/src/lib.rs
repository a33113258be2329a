#![forbid(unsafe_code)]
//! Declarative formats for the Comet bundler: environments, `package.toml`
//! manifests, project-directory signals, and release manifests.

pub mod environment;
pub mod manifest;
pub mod project;
pub mod release;

pub use environment::{canonical_where, Environment};
pub use manifest::{DeclarationBlock, FileGroup, ManifestError, PackageManifest};
pub use release::{ReleaseError, ReleaseManifest};
