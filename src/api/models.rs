//! API request and response models

use crate::engine::SamplingParams;
use crate::error::ApiError;
use crate::models::{LoadOutcome, PullOutcome};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// List of model ids (`/v1/models`, `/v1/ps`)
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub models: Vec<String>,
}

/// Body of pull, load and unload requests
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PullResponse {
    pub model: String,
    pub status: PullOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadResponse {
    pub model: String,
    pub status: LoadOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnloadResponse {
    pub model: String,
    pub status: String,
}

/// A model present on local storage
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadedModelInfo {
    pub model_id: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub loaded: bool,
    /// When the model's runner was created, if it is loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadedModelsResponse {
    pub models: Vec<DownloadedModelInfo>,
}

/// One chat message; non-string content is treated as empty
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// OpenAI-style chat completion request
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

impl ChatCompletionRequest {
    /// Content of the first user message with non-empty text
    pub fn prompt(&self) -> Result<String, ApiError> {
        let messages = self
            .messages
            .as_ref()
            .ok_or_else(|| ApiError::BadRequest("Messages missing in request".to_string()))?;

        messages
            .iter()
            .filter(|m| m.role == "user")
            .filter_map(|m| m.content.as_str())
            .find(|content| !content.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("User content missing in request".to_string()))
    }

    pub fn model_id(&self) -> Result<&str, ApiError> {
        self.model
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Model missing in request".to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

/// Non-streaming completion (`chat.completion`)
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    pub fn new(id: String, created: i64, model: String, content: String) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: Some("stop".to_string()),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// One streamed event (`chat.completion.chunk`)
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    fn with_choice(id: &str, created: i64, model: &str, choice: ChunkChoice) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![choice],
        }
    }

    /// Chunk carrying one generated fragment
    pub fn fragment(id: &str, created: i64, model: &str, content: String) -> Self {
        Self::with_choice(
            id,
            created,
            model,
            ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: Some(content),
                },
                finish_reason: None,
            },
        )
    }

    /// Final chunk of a finished generation
    pub fn stop(id: &str, created: i64, model: &str) -> Self {
        Self::with_choice(
            id,
            created,
            model,
            ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: None,
                },
                finish_reason: Some("stop".to_string()),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_prompt_first_non_empty_user_message() {
        let req = request(json!({
            "model": "m1",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": ""},
                {"role": "user", "content": "first"},
                {"role": "user", "content": "second"}
            ]
        }));
        assert_eq!(req.prompt().unwrap(), "first");
    }

    #[test]
    fn test_prompt_errors() {
        let missing = request(json!({"model": "m1"}));
        match missing.prompt() {
            Err(ApiError::BadRequest(msg)) => assert_eq!(msg, "Messages missing in request"),
            other => panic!("unexpected: {:?}", other),
        }

        let no_user = request(json!({
            "model": "m1",
            "messages": [{"role": "assistant", "content": "hi"}, {"role": "user", "content": 5}]
        }));
        match no_user.prompt() {
            Err(ApiError::BadRequest(msg)) => assert_eq!(msg, "User content missing in request"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_sampling_params_flattened() {
        let req = request(json!({
            "model": "m1",
            "messages": [],
            "stream": true,
            "max_length": 16,
            "do_sample": false
        }));
        assert!(req.stream);
        assert_eq!(req.sampling.max_length, Some(16.0));
        assert_eq!(req.sampling.do_sample, Some(false));
        assert_eq!(req.sampling.temperature, None);
    }

    #[test]
    fn test_stop_chunk_shape() {
        let chunk = serde_json::to_value(ChatCompletionChunk::stop("id-1", 7, "m1")).unwrap();
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["choices"][0]["finish_reason"], "stop");
        assert_eq!(chunk["choices"][0]["delta"], json!({}));
    }
}
