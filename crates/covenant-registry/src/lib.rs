//! covenant-registry
//!
//! The covenant node registry: the record table + ask tables (throttle
//! state), the payee selection engine, and the checksummed snapshot
//! persistence format.

pub mod persistence;
pub mod registry;
pub mod selection;

pub use persistence::{load_snapshot, save_snapshot};
pub use registry::Registry;
pub use selection::SelectionEngine;
