//! Loaded model runners
//!
//! A [`Runner`] owns a constructed engine for one model. Requests borrow it
//! through an `Arc` for the duration of a single generation, so unloading a
//! model never invalidates a generation that is already running.

use crate::engine::{
    DecodeStream, Engine, EngineError, EngineLoadError, EngineLoader, Generator, SamplingParams,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Marker preceding the final user turn in templated prompts
const USER_TURN_MARKER: &str = "<|user|>";

/// Request-ready engine instance for one model
pub struct Runner {
    model_id: String,
    local_path: PathBuf,
    engine: Box<dyn Engine>,
    loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("model_id", &self.model_id)
            .field("local_path", &self.local_path)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(model_id: String, local_path: PathBuf, engine: Box<dyn Engine>) -> Self {
        Self {
            model_id,
            local_path,
            engine,
            loaded_at: Utc::now(),
        }
    }

    /// Construct the engine for a downloaded model
    ///
    /// Blocks for as long as the engine takes to load. A failure is logged
    /// with the construction stage that failed.
    pub fn load(
        loader: &dyn EngineLoader,
        model_id: &str,
        local_path: &Path,
    ) -> Result<Self, EngineLoadError> {
        tracing::info!(model_id = %model_id, path = ?local_path, "Loading model");

        match loader.load(local_path) {
            Ok(engine) => {
                tracing::info!(model_id = %model_id, path = ?local_path, "Model loaded successfully");
                Ok(Self::new(
                    model_id.to_string(),
                    local_path.to_path_buf(),
                    engine,
                ))
            }
            Err(e) => {
                tracing::error!(
                    model_id = %model_id,
                    path = ?local_path,
                    stage = %e.stage,
                    error = %e.message,
                    "Loading model failed"
                );
                Err(e)
            }
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Start a generation and iterate over its decoded text fragments
    pub fn fragments(
        &self,
        prompt: &str,
        params: &SamplingParams,
        cancel: CancelFlag,
    ) -> Result<Fragments, EngineError> {
        let tokens = self.engine.encode(trim_to_last_user_turn(prompt))?;
        let generator = self.engine.generator(tokens, params)?;

        Ok(Fragments {
            generator,
            decoder: self.engine.decode_stream(),
            cancel,
        })
    }

    /// Run a generation to completion and return the full text
    pub fn complete(
        &self,
        prompt: &str,
        params: &SamplingParams,
        cancel: CancelFlag,
    ) -> Result<String, EngineError> {
        Ok(self.fragments(prompt, params, cancel)?.collect())
    }
}

/// Encode only the text from the last user turn onwards when present
fn trim_to_last_user_turn(prompt: &str) -> &str {
    prompt
        .rfind(USER_TURN_MARKER)
        .map(|pos| &prompt[pos..])
        .unwrap_or(prompt)
}

/// Shared flag that stops a generation before its next step
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Iterator over generated text fragments
///
/// The cancel flag is checked before every step, so a cancelled generation
/// stops without computing another token.
pub struct Fragments {
    generator: Box<dyn Generator>,
    decoder: Box<dyn DecodeStream>,
    cancel: CancelFlag,
}

impl Iterator for Fragments {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let token = self.generator.step()?;
        Some(self.decoder.decode(token))
    }
}
