//! # Core Browser Logic
//!
//! Navigation, resolution and history for the resource browser.
//! It knows nothing about rendering; hosts observe it through events.
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │    Browser (resolver)   │
//!                    │                         │
//!                    │  • ResourceCache        │
//!                    │  • HistoryStack / List  │
//!                    │  • ResourceStore        │
//!                    └───────────┬─────────────┘
//!                                │ Emitter
//!            ┌───────────────────┼───────────────────┐
//!            ▼                   ▼                   ▼
//!     ┌────────────┐      ┌────────────┐      ┌────────────┐
//!     │   Search   │      │   Output   │      │    Host    │
//!     │  Indexer   │      │   Store    │      │     UI     │
//!     └────────────┘      └────────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`browser`]: the resolve state machine, the single writer of all state below
//! - [`cache`]: canonical id → resolved reference or error
//! - [`history`]: cursor-indexed stack plus the bounded visited list
//! - [`routes`]: the fixed route table and `map_to_route`
//! - [`events`]: typed publish/subscribe bus
//! - [`persistence`]: the `StateStore` port and its backends
//! - [`config`]: layered configuration

pub mod browser;
pub mod cache;
pub mod config;
pub mod events;
pub mod history;
pub mod persistence;
pub mod resource;
pub mod routes;
pub mod vault;
