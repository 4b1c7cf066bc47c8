//! Model Host - local model-serving host
//!
//! Pulls declared models from a hub or a local path into a models directory,
//! loads them into inference engines on demand and serves OpenAI-style chat
//! completions over HTTP.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod models;

pub use config::HostConfig;
pub use error::{ApiError, LifecycleError};
pub use manifest::{Manifest, ManifestEntry, ModelSource};
pub use models::{LoadOutcome, ModelManager, PullOutcome};
