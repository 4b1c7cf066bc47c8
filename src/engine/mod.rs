//! Inference engine boundary
//!
//! The host never inspects engine internals. It only needs to construct an
//! engine from a model directory, encode a prompt, step a generator and
//! decode tokens incrementally. Construction happens in three stages (model,
//! tokenizer, decode state) and a failure names the stage that failed.

mod echo;

pub use echo::{EchoEngine, EchoLoader};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Token id produced by an engine's tokenizer
pub type Token = u32;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Constructs engines from downloaded model directories
///
/// Loading may block for a long time; callers run it on a blocking thread.
pub trait EngineLoader: Send + Sync {
    fn load(&self, model_dir: &Path) -> Result<Box<dyn Engine>, EngineLoadError>;
}

/// A loaded model together with its tokenizer
pub trait Engine: Send + Sync {
    /// Encode prompt text into tokens
    fn encode(&self, text: &str) -> Result<Vec<Token>, EngineError>;

    /// Create a generator seeded with the prompt tokens
    fn generator(
        &self,
        prompt: Vec<Token>,
        params: &SamplingParams,
    ) -> Result<Box<dyn Generator>, EngineError>;

    /// Fresh incremental decode state for one generation
    fn decode_stream(&self) -> Box<dyn DecodeStream>;
}

/// Produces one token per step; `None` signals completion
pub trait Generator: Send {
    fn step(&mut self) -> Option<Token>;
}

/// Turns generated tokens into text fragments as they arrive
pub trait DecodeStream: Send {
    fn decode(&mut self, token: Token) -> String;
}

// ============================================================================
// Errors
// ============================================================================

/// Engine construction stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Model,
    Tokenizer,
    DecodeState,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Tokenizer => write!(f, "tokenizer"),
            Self::DecodeState => write!(f, "decode_state"),
        }
    }
}

#[derive(Debug, Error)]
#[error("could not create {stage}: {message}")]
pub struct EngineLoadError {
    pub stage: LoadStage,
    pub message: String,
}

impl EngineLoadError {
    pub fn new(stage: LoadStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Failure while running an already loaded engine
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

// ============================================================================
// Sampling parameters
// ============================================================================

/// Generation search options
///
/// Only options present in the request are forwarded to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_beams: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_return_sequences: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stopping: Option<bool>,
}

impl SamplingParams {
    /// Numeric options that were supplied, by name
    pub fn numeric(&self) -> Vec<(&'static str, f64)> {
        [
            ("min_length", self.min_length),
            ("max_length", self.max_length),
            ("top_p", self.top_p),
            ("temperature", self.temperature),
            ("top_k", self.top_k),
            ("repetition_penalty", self.repetition_penalty),
            ("num_beams", self.num_beams),
            ("num_return_sequences", self.num_return_sequences),
            ("length_penalty", self.length_penalty),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }

    /// Boolean options that were supplied, by name
    pub fn flags(&self) -> Vec<(&'static str, bool)> {
        [
            ("do_sample", self.do_sample),
            ("early_stopping", self.early_stopping),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}
