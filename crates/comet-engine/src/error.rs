//! Error types for comet-engine.

/// Errors produced by bundling operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A filesystem operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] comet_util::UtilError),

    /// A package manifest operation failed.
    #[error("{0}")]
    Manifest(#[from] comet_config::ManifestError),

    /// A project probe failed.
    #[error("{0}")]
    Project(#[from] comet_config::project::ProjectError),

    /// A release manifest operation failed.
    #[error("{0}")]
    Release(#[from] comet_config::ReleaseError),

    /// An ignore pattern failed to compile.
    #[error("invalid ignore pattern `{pattern}`: {message}")]
    IgnorePattern { pattern: String, message: String },

    /// A use or test handler was declared twice on one package.
    #[error("{which} handler already declared for package `{package}`")]
    DuplicateHandler { package: String, which: String },

    /// An extension was registered twice on one package.
    #[error("extension `{extension}` already registered by package `{package}`")]
    DuplicateExtension { package: String, extension: String },

    /// A manifest names a source transform the bundler does not provide.
    #[error("package `{package}` maps extension `{extension}` to unknown transform `{transform}`")]
    UnknownTransform {
        package: String,
        extension: String,
        transform: String,
    },

    /// A package could not be resolved anywhere.
    #[error("package `{name}` not found ({detail})")]
    PackageNotFound { name: String, detail: String },

    /// A package name appears in more than one local package set.
    #[error("package `{name}` found in more than one package set: {first} and {second}")]
    AmbiguousPackage {
        name: String,
        first: String,
        second: String,
    },

    /// A cache lookup needs a release manifest but none is set.
    #[error("No manifest set — cannot resolve package `{name}` from the cache")]
    NoReleaseManifest { name: String },

    /// A registered source path escapes its package's source root.
    #[error("source `{path}` escapes the package source root {root}")]
    SourceOutsideRoot { path: String, root: String },

    /// Two packages in scope claim the same extension.
    #[error("extension `{extension}` claimed by both `{first}` and `{second}`")]
    ExtensionConflict {
        extension: String,
        first: String,
        second: String,
    },

    /// The use graph loops back on itself.
    #[error("circular package use: {chain}")]
    DependencyCycle { chain: String },

    /// A js, css, or static resource was added without a path.
    #[error("{kind} resource registered without a path")]
    MissingPath { kind: String },

    /// A resource was added with no target environments.
    #[error("{kind} resource registered with an empty environment set")]
    MissingWhere { kind: String },

    /// A resource was bound to an environment its type does not allow.
    #[error("{kind} resource cannot be bound to environment `{environment}`")]
    InvalidEnvironment { kind: String, environment: String },

    /// A resource was added with neither inline data nor a source file.
    #[error("{kind} resource `{path}` has neither data nor a source file")]
    MissingContents { kind: String, path: String },

    /// A head or body fragment is not valid UTF-8.
    #[error("HTML fragment {path} is not valid UTF-8")]
    FragmentNotUtf8 { path: String },

    /// The output path has no final component to name the scratch dir after.
    #[error("invalid output path {path}")]
    InvalidOutputPath { path: String },

    /// A bundle control file could not be serialized.
    #[error("cannot serialize {what}: {source}")]
    Serialize {
        what: String,
        source: serde_json::Error,
    },
}
