//! Error types for selector evaluation, selection editing, the host bridge and export
//!
//! "No match" is not an evaluation failure: a well-formed selector that matches
//! nothing evaluates to an empty list. Only editing the selected set treats it
//! as an error (`SelectionError::NoMatch`).

use crate::extractors::SelectorKind;

/// A selector or path expression that could not be parsed or evaluated
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid {kind} selector '{selector}': {message}")]
pub struct SelectorError {
    pub kind: SelectorKind,
    pub selector: String,
    pub message: String,
}

impl SelectorError {
    pub fn new(kind: SelectorKind, selector: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            selector: selector.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised while adding, editing or removing selector specs
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectionError {
    #[error(transparent)]
    Invalid(#[from] SelectorError),

    /// Syntactically valid, but nothing in the document matches
    #[error("Selector '{selector}' does not match any element")]
    NoMatch { selector: String },

    #[error("Selector '{selector}' ({kind}) is already selected")]
    Duplicate { selector: String, kind: SelectorKind },

    #[error("No selector spec with id {0}")]
    UnknownSpec(u64),
}

/// Failures talking to (or being admitted by) the host side of the bridge
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostBridgeError {
    #[error("Timed out after {0} ms waiting for a response")]
    Timeout(u64),

    #[error("The receiving end produced no response")]
    MissingResponse,

    #[error("Bridge endpoint is disconnected")]
    Disconnected,

    #[error("Page '{0}' does not allow content scripts")]
    DisallowedPage(String),

    #[error("Malformed bridge message: {0}")]
    Protocol(String),
}

/// Failures encoding a dataset
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Spreadsheet encoding failed: {0}")]
    Xml(String),

    #[error("Encoded output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Failures saving or restoring a selected set
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored selection is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures loading `PickerConfig`
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Value { field: &'static str, reason: String },
}
