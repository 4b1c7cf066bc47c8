//! Model management module
//!
//! Provides functionality for:
//! - Laying out model directories and staging areas on disk
//! - Downloading models from a hub or copying them from local paths
//! - Constructing runners for downloaded models
//! - Tracking which models are downloaded and loaded

pub mod download;
pub mod loader;
pub mod registry;
pub mod storage;

pub use download::{DownloadFailures, Downloader, HubClient};
pub use loader::{CancelFlag, Fragments, Runner};
pub use registry::{LoadOutcome, ModelManager, ModelMetadata, PullOutcome};
