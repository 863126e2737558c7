//! Error types for mapping generation and templating.

use std::path::PathBuf;
use thiserror::Error;

/// Broad category of a [`CompileError`].
///
/// Every compilation failure belongs to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The schema uses a construct that has no mapping equivalent.
    UnsupportedConstruct,
    /// A field's type could not be determined.
    TypeInferenceFailure,
    /// A field (or the root) was redefined with an incompatible type.
    TypeConflict,
    /// A `$ref` could not be dereferenced.
    ReferenceResolutionFailure,
    /// A top-level schema has no identifying URI.
    MissingIdentity,
}

/// Errors while building a type resolution configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported JSON type \"{name}\": expected string, boolean, number or integer")]
    UnsupportedJsonType { name: String },

    #[error("invalid configuration document: {source}")]
    InvalidDocument {
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Load(#[from] ResolveError),
}

impl ConfigError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Errors while loading or fetching JSON documents.
#[derive(Debug, Error)]
pub enum ResolveError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URI \"{uri}\": {message}")]
    InvalidUri { uri: String, message: String },

    #[error("cannot fetch \"{uri}\": unsupported scheme \"{scheme}\"")]
    UnsupportedScheme { uri: String, scheme: String },

    #[error("fragment not found: {fragment}")]
    FragmentNotFound { fragment: String },
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::FileNotFound { .. } | ResolveError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            ResolveError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors while compiling a JSON Schema into a mapping.
///
/// Each variant carries the schema path it failed at: the original location,
/// the last followed `$ref`, or a path synthesized through composition
/// branches (`/anyOf[1]`), array items (`/items[0]`) and dependencies
/// (`/dependencies[name]`).
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("schemas with patternProperties are not supported at {path}")]
    PatternProperties { path: String },

    #[error("schemas with additionalProperties are not supported at {path}")]
    AdditionalProperties { path: String },

    #[error("schemas with an array of types are not supported at {path}")]
    TypeArray { path: String },

    #[error("\"{keyword}\" must be an array of schemas at {path}")]
    CompositionNotArray { path: String, keyword: String },

    #[error("array schema without items at {path}")]
    MissingItems { path: String },

    #[error("unsupported type \"{name}\" at {path}")]
    UnsupportedType { path: String, name: String },

    #[error("cannot infer field type at {path}: {reason}")]
    TypeInference { path: String, reason: String },

    #[error("redefinition of field with type \"{found}\" conflicts with \"{existing}\" at {path}")]
    TypeConflict {
        path: String,
        existing: String,
        found: String,
    },

    #[error("root schema type can only be \"object\", got \"{found}\" at {path}")]
    RootType { path: String, found: String },

    #[error("cannot resolve reference \"{reference}\": {source}")]
    Reference {
        reference: String,
        #[source]
        source: ResolveError,
    },

    #[error("circular reference \"{reference}\" at {path}")]
    CircularReference { path: String, reference: String },

    #[error("schema has no \"id\" and {source_name} is not a file")]
    MissingIdentity { source_name: String },
}

impl CompileError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::PatternProperties { .. }
            | CompileError::AdditionalProperties { .. }
            | CompileError::TypeArray { .. }
            | CompileError::CompositionNotArray { .. }
            | CompileError::MissingItems { .. }
            | CompileError::UnsupportedType { .. } => ErrorKind::UnsupportedConstruct,
            CompileError::TypeInference { .. } => ErrorKind::TypeInferenceFailure,
            CompileError::TypeConflict { .. } | CompileError::RootType { .. } => {
                ErrorKind::TypeConflict
            }
            CompileError::Reference { .. } | CompileError::CircularReference { .. } => {
                ErrorKind::ReferenceResolutionFailure
            }
            CompileError::MissingIdentity { .. } => ErrorKind::MissingIdentity,
        }
    }

    /// Returns the schema path the error points at.
    pub fn path(&self) -> &str {
        match self {
            CompileError::PatternProperties { path }
            | CompileError::AdditionalProperties { path }
            | CompileError::TypeArray { path }
            | CompileError::CompositionNotArray { path, .. }
            | CompileError::MissingItems { path }
            | CompileError::UnsupportedType { path, .. }
            | CompileError::TypeInference { path, .. }
            | CompileError::TypeConflict { path, .. }
            | CompileError::RootType { path, .. }
            | CompileError::CircularReference { path, .. } => path,
            CompileError::Reference { reference, .. } => reference,
            CompileError::MissingIdentity { source_name } => source_name,
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Reference { source, .. } => source.exit_code(),
            _ => 2,
        }
    }
}

/// Errors while turning mappings into templates and back.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template rendering failed: {0}")]
    Render(#[from] minijinja::Error),

    #[error("rendered template is not valid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("{what} must be a JSON object")]
    NotAnObject { what: String },

    #[error("a type name can only be given for a single mapping, found {count}")]
    AmbiguousTypeName { count: usize },

    #[error("block {name} is defined twice, rename one of the colliding fields")]
    DuplicateBlock { name: String },

    #[error("cannot write {text} as literal template text")]
    UnrepresentableText { text: String },
}

impl TemplateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}
