//! iiif-browser library exports for the CLI driver and integration tests

pub mod core;
pub mod fetch;
pub mod output;
pub mod search;

#[cfg(test)]
pub mod test_support;

pub use crate::core::browser::{Browser, BrowserSettings, ResolveOptions, ResolveState};
pub use crate::core::events::{BrowserEvent, Emitter, EventTopic};
pub use crate::core::resource::{Resource, ResourceRef};
