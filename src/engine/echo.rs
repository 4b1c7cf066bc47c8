//! Echo engine
//!
//! Stand-in engine used when no real inference backend is linked. It
//! tokenizes on whitespace and "generates" by replaying the prompt tokens,
//! which is enough to exercise the full load/serve path end to end.

use super::{
    DecodeStream, Engine, EngineError, EngineLoadError, EngineLoader, Generator, LoadStage,
    SamplingParams, Token,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Upper bound on generated tokens when `max_length` is not supplied
const DEFAULT_MAX_TOKENS: usize = 256;

/// Loader for [`EchoEngine`]
#[derive(Debug, Default, Clone)]
pub struct EchoLoader;

impl EchoLoader {
    pub fn new() -> Self {
        Self
    }
}

impl EngineLoader for EchoLoader {
    fn load(&self, model_dir: &Path) -> Result<Box<dyn Engine>, EngineLoadError> {
        // Model: a directory holding at least one file
        let mut entries = std::fs::read_dir(model_dir)
            .map_err(|e| EngineLoadError::new(LoadStage::Model, format!("{:?}: {}", model_dir, e)))?;
        if !entries.any(|e| e.map(|e| e.path().is_file()).unwrap_or(false)) {
            return Err(EngineLoadError::new(
                LoadStage::Model,
                format!("no model files in {:?}", model_dir),
            ));
        }

        // Tokenizer: tokenizer.json is optional but must be valid when present
        let tokenizer_path = model_dir.join("tokenizer.json");
        if tokenizer_path.is_file() {
            let content = std::fs::read_to_string(&tokenizer_path)
                .map_err(|e| EngineLoadError::new(LoadStage::Tokenizer, e.to_string()))?;
            serde_json::from_str::<serde_json::Value>(&content).map_err(|e| {
                EngineLoadError::new(LoadStage::Tokenizer, format!("tokenizer.json: {}", e))
            })?;
        }

        let engine = EchoEngine::new();

        // Decode state
        let mut stream = engine.decode_stream();
        let probe = engine
            .encode("ready")
            .map_err(|e| EngineLoadError::new(LoadStage::DecodeState, e.to_string()))?;
        if probe.iter().map(|t| stream.decode(*t)).collect::<String>() != "ready" {
            return Err(EngineLoadError::new(
                LoadStage::DecodeState,
                "decode stream does not round-trip",
            ));
        }

        Ok(Box::new(engine))
    }
}

#[derive(Debug, Default)]
struct Vocab {
    words: Vec<String>,
    ids: HashMap<String, Token>,
}

impl Vocab {
    fn intern(&mut self, word: &str) -> Token {
        if let Some(id) = self.ids.get(word) {
            return *id;
        }
        let id = self.words.len() as Token;
        self.words.push(word.to_string());
        self.ids.insert(word.to_string(), id);
        id
    }
}

/// Whitespace tokenizer that echoes the prompt back
#[derive(Debug, Default)]
pub struct EchoEngine {
    vocab: Arc<Mutex<Vocab>>,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for EchoEngine {
    fn encode(&self, text: &str) -> Result<Vec<Token>, EngineError> {
        let mut vocab = self.vocab.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(text.split_whitespace().map(|w| vocab.intern(w)).collect())
    }

    fn generator(
        &self,
        prompt: Vec<Token>,
        params: &SamplingParams,
    ) -> Result<Box<dyn Generator>, EngineError> {
        let limit = match params.max_length {
            Some(max) if max < 0.0 => {
                return Err(EngineError(format!("invalid max_length {}", max)));
            }
            Some(max) => max as usize,
            None => DEFAULT_MAX_TOKENS,
        };

        Ok(Box::new(EchoGenerator {
            tokens: prompt.into_iter().take(limit).collect::<Vec<_>>().into_iter(),
        }))
    }

    fn decode_stream(&self) -> Box<dyn DecodeStream> {
        Box::new(EchoDecodeStream {
            vocab: self.vocab.clone(),
            emitted: 0,
        })
    }
}

struct EchoGenerator {
    tokens: std::vec::IntoIter<Token>,
}

impl Generator for EchoGenerator {
    fn step(&mut self) -> Option<Token> {
        self.tokens.next()
    }
}

struct EchoDecodeStream {
    vocab: Arc<Mutex<Vocab>>,
    emitted: usize,
}

impl DecodeStream for EchoDecodeStream {
    fn decode(&mut self, token: Token) -> String {
        let vocab = self.vocab.lock().unwrap_or_else(PoisonError::into_inner);
        let word = vocab
            .words
            .get(token as usize)
            .map(String::as_str)
            .unwrap_or_default();

        let fragment = if self.emitted == 0 {
            word.to_string()
        } else {
            format!(" {}", word)
        };
        self.emitted += 1;
        fragment
    }
}
