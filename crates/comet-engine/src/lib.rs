#![forbid(unsafe_code)]
//! The Comet bundling engine: package resolution, source registration,
//! resource accumulation, minification, and bundle emission.

pub mod bundle;
pub mod bundler;
pub mod emit;
pub mod error;
pub mod fetch;
pub mod minify;
pub mod package;
pub mod registry;
pub mod sources;
pub mod transform;

pub use bundle::{Bundle, ManifestEntry, PackageApi};
pub use bundler::{bundle, BundleOptions};
pub use emit::NodeModulesMode;
pub use error::EngineError;
pub use fetch::{load_release_manifest, populate_cache_for_release};
pub use minify::Minifiers;
pub use package::{Package, PackageId};
pub use registry::{Registry, RegistryConfig};
pub use transform::Transform;
