//! Chat completion endpoint
//!
//! Generation runs on the blocking pool. Streaming responses are fed through
//! a bounded channel; once the client goes away the channel closes and the
//! generation is cancelled before computing another token.

use super::models::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use super::routes::AppState;
use crate::engine::SamplingParams;
use crate::error::ApiError;
use crate::models::{CancelFlag, Runner};
use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Events buffered between the generation loop and the response body
const STREAM_BUFFER: usize = 32;

/// POST /v1/chat/completions - OpenAI-style chat completion
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let prompt = req.prompt()?;
    let model_id = req.model_id()?.to_string();
    tracing::debug!(model_id = %model_id, prompt = %prompt, "Received prompt");

    for (name, value) in req.sampling.numeric() {
        tracing::debug!(param = name, value, "Setting search option");
    }
    for (name, value) in req.sampling.flags() {
        tracing::debug!(param = name, value, "Setting search option");
    }

    let runner = state.manager.acquire(&model_id).await?;
    crate::metrics::record_completion(&model_id, req.stream);

    let created = chrono::Utc::now().timestamp();
    let id = completion_id();

    if req.stream {
        tracing::debug!(model_id = %model_id, "Serving streaming request");
        stream_completion(runner, prompt, req.sampling, id, created)
    } else {
        tracing::debug!(model_id = %model_id, "Serving non-streaming request");
        let text = tokio::task::spawn_blocking(move || {
            runner.complete(&prompt, &req.sampling, CancelFlag::new())
        })
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .map_err(|e| ApiError::Failed(format!("Generation failed: {}", e)))?;

        Ok(Json(ChatCompletionResponse::new(id, created, model_id, text)).into_response())
    }
}

fn stream_completion(
    runner: Arc<Runner>,
    prompt: String,
    sampling: SamplingParams,
    id: String,
    created: i64,
) -> Result<Response, ApiError> {
    let cancel = CancelFlag::new();
    let fragments = runner
        .fragments(&prompt, &sampling, cancel.clone())
        .map_err(|e| ApiError::Failed(format!("Generation failed: {}", e)))?;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(STREAM_BUFFER);

    tokio::task::spawn_blocking(move || {
        let model_id = runner.model_id().to_string();

        for fragment in fragments {
            let chunk = ChatCompletionChunk::fragment(&id, created, &model_id, fragment);
            if !send_event(&tx, json_event(&chunk)) {
                cancel.cancel();
                tracing::info!(model_id = %model_id, "Client disconnected, stopping generation");
                return;
            }
            // Stop before the next step if the response body was dropped
            if tx.is_closed() {
                cancel.cancel();
            }
        }

        if cancel.is_cancelled() {
            tracing::info!(model_id = %model_id, "Generation cancelled");
            return;
        }

        let stop = ChatCompletionChunk::stop(&id, created, &model_id);
        if send_event(&tx, json_event(&stop)) {
            send_event(&tx, Event::default().data("[DONE]"));
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn json_event(chunk: &ChatCompletionChunk) -> Event {
    match serde_json::to_string(chunk) {
        Ok(data) => Event::default().data(data),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize chunk");
            Event::default().comment("serialization error")
        }
    }
}

/// Returns false once the receiving side is gone
fn send_event(tx: &mpsc::Sender<Result<Event, Infallible>>, event: Event) -> bool {
    tx.blocking_send(Ok(event)).is_ok()
}

fn completion_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    format!("chatcmpl-{:x}", nanos)
}
