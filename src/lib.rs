// Freshness and history primitives
pub mod freshness;
pub mod history;

// Data model and wire decoding
pub mod prediction;
pub mod reading;

// Shared current-state view
pub mod state;

// Pull path, push path and on-demand requests
pub mod alerts;
pub mod channel;
pub mod orchestrator;
pub mod poll;

// Capability adapters
pub mod notifier;
pub mod service;

// Session composition and consumer surface
pub mod api;
pub mod session;

pub mod config;
pub mod error;

pub use error::{SyncError, ValidationError};
pub use session::{SessionDeps, SessionSnapshot, SyncSession};
