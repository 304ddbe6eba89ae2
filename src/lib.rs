//! Web element picker and tabular extraction engine
//!
//! Provides:
//! - Selection mode: hover highlighting and click-to-choose over a parsed page
//! - CSS and path-expression synthesis for a chosen element
//! - Selector evaluation and index-aligned table extraction
//! - A JSON command bridge (also exposed over a C ABI)
//! - CSV, JSON and SpreadsheetML export

pub mod bridge;
pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod extractors;
pub mod ffi;
pub mod pagination;
pub mod selected_set;
pub mod selection;
pub mod store;

pub use bridge::{BridgeClient, BridgeEvent, Command, ContentAgent, LoopbackTransport, Response, Transport};
pub use config::PickerConfig;
pub use document::{Document, SharedDocument};
pub use error::*;
pub use export::{export, ExportFormat};
pub use extractors::*;
pub use selected_set::SelectedSet;
pub use selection::{ElementChosen, SelectionSession, SessionState};
pub use store::{JsonFileStore, MemoryStore, SelectionStore};
