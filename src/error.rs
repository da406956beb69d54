//! Domain errors.
//!
//! [`ManifestError`] is fatal for the whole run (exit code 2). A
//! [`SourceParseError`] only skips the offending file.

use std::path::PathBuf;

use thiserror::Error;

/// The manifest could not be read, parsed, or validated.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest: {0}")]
    Yaml(String),

    #[error("duplicate service id '{0}'")]
    DuplicateService(String),

    #[error("service '{service}' declares unsupported language '{language}'")]
    UnknownLanguage { service: String, language: String },

    #[error("duplicate contract id '{0}'")]
    DuplicateContract(String),

    #[error("contract '{contract}' references undeclared service '{service}'")]
    UnknownService { contract: String, service: String },

    #[error("contract '{contract}' has an invalid direction '{direction}'")]
    InvalidDirection { contract: String, direction: String },

    #[error("contract '{contract}' declares endpoint '{endpoint}' more than once")]
    DuplicateEndpoint { contract: String, endpoint: String },

    #[error("contract '{contract}' has an invalid HTTP method '{method}'")]
    InvalidMethod { contract: String, method: String },

    #[error("{endpoint} in contract '{contract}' declares invalid status code {code}")]
    InvalidStatusCode {
        contract: String,
        endpoint: String,
        code: i64,
    },

    #[error("duplicate field '{field}' in {scope}")]
    DuplicateField { scope: String, field: String },

    #[error("field '{path}' has unknown type '{ty}'")]
    UnknownFieldType { path: String, ty: String },

    #[error("field '{path}' declares '{attribute}', which is only allowed on scalar fields")]
    ScalarOnly { path: String, attribute: &'static str },

    #[error("field '{path}' is required but declares a default")]
    RequiredWithDefault { path: String },

    #[error("field '{path}' has an empty or inverted range")]
    InvalidRange { path: String },

    #[error("field '{path}' references undeclared type '{name}'")]
    UnknownRef { path: String, name: String },

    #[error("verification.tolerance_seconds of contract '{contract}' must be a non-negative integer, got {value}")]
    InvalidTolerance { contract: String, value: String },

    #[error("enum_case for '{service}' names unknown casing '{casing}'")]
    UnknownCasing { service: String, casing: String },

    #[error("enum_case names undeclared service '{0}'")]
    UnknownCasingService(String),
}

/// A single source file could not be lexed by its language adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{path}:{line}: {message}")]
pub struct SourceParseError {
    pub path: String,
    pub line: usize,
    pub message: String,
}

impl SourceParseError {
    pub fn new(path: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
