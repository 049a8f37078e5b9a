//! The front-facing `/v1/messages` HTTP route
//!
//! Plain requests return a JSON `AnthropicResponse`. Requests with
//! `"stream": true` get the same response re-expressed as the Anthropic
//! Messages API's newline-delimited SSE event sequence — the dispatcher
//! itself is request/response-shaped, so streaming is a presentation concern
//! applied once the pipeline has produced its final message, not a separate
//! code path through the stages.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use ccrouter_core::HttpError;
use futures_util::stream;
use http::HeaderMap;

use crate::dispatcher::Dispatcher;
use crate::error::PipelineError;
use crate::wire::anthropic::{
    AnthropicMessageDelta, AnthropicRequest, AnthropicResponse, AnthropicResponseBlock, AnthropicStreamContentBlock, AnthropicStreamDelta,
    AnthropicStreamEvent, AnthropicStreamMessage,
};

/// Shared state the `/v1/messages` handler needs
#[derive(Clone)]
pub struct PipelineState {
    dispatcher: Arc<Dispatcher>,
}

impl PipelineState {
    /// Wrap a dispatcher for use as axum route state
    pub const fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// The `/v1/messages` route, ready to be merged into the front-facing server's router
pub fn router(state: PipelineState) -> Router {
    Router::new().route("/v1/messages", post(messages_handler)).with_state(state)
}

async fn messages_handler(State(state): State<PipelineState>, headers: HeaderMap, Json(request): Json<AnthropicRequest>) -> Response {
    let streaming = request.stream.unwrap_or(false);

    match state.dispatcher.dispatch(request, headers).await {
        Ok(response) if streaming => synthesize_sse(response).into_response(),
        Ok(response) => Json(response).into_response(),
        Err(error) => pipeline_error_response(&error),
    }
}

fn pipeline_error_response(error: &PipelineError) -> Response {
    let status = error.status_code();
    let body = serde_json::json!({
        "type": "error",
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        },
    });
    (status, Json(body)).into_response()
}

/// Re-express a completed response as the SSE event sequence a streaming
/// client expects, in one shot (no incremental upstream deltas to relay,
/// since the dispatcher only ever returns a finished message).
fn synthesize_sse(response: AnthropicResponse) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let events = stream_events(response).into_iter().map(to_sse_event).collect::<Vec<_>>();
    Sse::new(stream::iter(events.into_iter().map(Ok)))
}

fn to_sse_event(event: AnthropicStreamEvent) -> Event {
    let name = match &event {
        AnthropicStreamEvent::MessageStart { .. } => "message_start",
        AnthropicStreamEvent::ContentBlockStart { .. } => "content_block_start",
        AnthropicStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        AnthropicStreamEvent::ContentBlockStop { .. } => "content_block_stop",
        AnthropicStreamEvent::MessageDelta { .. } => "message_delta",
        AnthropicStreamEvent::MessageStop => "message_stop",
        AnthropicStreamEvent::Ping => "ping",
    };
    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_owned());
    Event::default().event(name).data(data)
}

fn stream_events(response: AnthropicResponse) -> Vec<AnthropicStreamEvent> {
    let mut events = vec![AnthropicStreamEvent::MessageStart {
        message: AnthropicStreamMessage {
            id: response.id.clone(),
            message_type: response.response_type.clone(),
            role: response.role.clone(),
            model: response.model.clone(),
            usage: Some(response.usage.clone()),
        },
    }];

    for (index, block) in response.content.into_iter().enumerate() {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        match block {
            AnthropicResponseBlock::Text { text } => {
                events.push(AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicStreamContentBlock::Text { text: String::new() },
                });
                events.push(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicStreamDelta::TextDelta { text },
                });
            }
            AnthropicResponseBlock::ToolUse { id, name, input } => {
                events.push(AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: AnthropicStreamContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::json!({}),
                    },
                });
                events.push(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicStreamDelta::InputJsonDelta { partial_json: input.to_string() },
                });
            }
        }
        events.push(AnthropicStreamEvent::ContentBlockStop { index });
    }

    events.push(AnthropicStreamEvent::MessageDelta {
        delta: AnthropicMessageDelta {
            stop_reason: response.stop_reason,
            stop_sequence: response.stop_sequence,
        },
        usage: Some(response.usage),
    });
    events.push(AnthropicStreamEvent::MessageStop);

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::anthropic::AnthropicUsage;

    #[test]
    fn stream_events_wraps_a_single_text_block_in_start_delta_stop() {
        let response = AnthropicResponse {
            id: "msg_1".to_owned(),
            response_type: "message".to_owned(),
            role: "assistant".to_owned(),
            content: vec![AnthropicResponseBlock::Text { text: "hi".to_owned() }],
            model: "claude-3-opus".to_owned(),
            stop_reason: Some("end_turn".to_owned()),
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: 1,
                output_tokens: 1,
            },
        };
        let events = stream_events(response);
        assert!(matches!(events.first(), Some(AnthropicStreamEvent::MessageStart { .. })));
        assert!(matches!(events.last(), Some(AnthropicStreamEvent::MessageStop)));
        assert_eq!(events.len(), 6);
    }
}
