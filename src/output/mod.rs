//! # Output
//!
//! Selection of resources for export and the format/action targets that
//! export them. Concrete formats and actions live with the host; this module
//! only decides what is selected, which targets apply, and runs them.

pub mod selection;
pub mod store;
pub mod target;

pub use selection::{LinkConfig, SelectedItem, SelectionState};
pub use store::OutputStore;
pub use target::{ALL_TYPES, OutputAction, OutputError, OutputFormat, OutputSubject, OutputTarget};
