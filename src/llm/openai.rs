//! OpenAI-compatible streaming chat client
//!
//! Parses the SSE chat-completions stream into [`ResponseFragment`]s.
//! Text deltas are forwarded as they arrive; tool-call deltas are
//! accumulated and emitted as one terminal fragment when the stream
//! ends, since argument JSON arrives in pieces.

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ChatClient, ChatMessage, ResponseFragment, ResponseStream};
use crate::{Error, Result};

/// Streamed chat-completion chunk (the fields this pipeline consumes)
#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Accumulates raw SSE bytes and yields complete lines
///
/// Lines are split at the byte level before UTF-8 conversion, so a
/// multi-byte character arriving across two network chunks is never
/// mangled into a replacement character.
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline = self.bytes.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// OpenAI-compatible chat client
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: SecretString, base_url: String, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiChat {
    async fn generate(&self, history: &[ChatMessage]) -> Result<ResponseStream> {
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            stream: bool,
        }

        let request = ChatRequest {
            model: &self.model,
            messages: history,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel::<Result<ResponseFragment>>(32);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut line_buffer = LineBuffer::new();
            let mut tool_name: Option<String> = None;
            let mut tool_arguments = String::new();

            'outer: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(Error::Llm(e.to_string()))).await;
                        return;
                    }
                };

                line_buffer.extend(&chunk);

                while let Some(line) = line_buffer.next_line() {
                    let Some(payload) = line.trim().strip_prefix("data: ") else {
                        continue;
                    };

                    if payload == "[DONE]" {
                        break 'outer;
                    }

                    let parsed: ChatChunk = match serde_json::from_str(payload) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed stream chunk");
                            continue;
                        }
                    };

                    let Some(choice) = parsed.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(content) = choice.delta.content {
                        if !content.is_empty()
                            && tx.send(Ok(ResponseFragment::Text(content))).await.is_err()
                        {
                            return;
                        }
                    }

                    for call in choice.delta.tool_calls.unwrap_or_default() {
                        let Some(function) = call.function else {
                            continue;
                        };
                        if let Some(name) = function.name {
                            tool_name.get_or_insert(name);
                        }
                        if let Some(arguments) = function.arguments {
                            tool_arguments.push_str(&arguments);
                        }
                    }
                }
            }

            if let Some(name) = tool_name {
                tracing::info!(tool = %name, "tool call received");
                let _ = tx
                    .send(Ok(ResponseFragment::ToolCall {
                        name,
                        arguments: tool_arguments,
                    }))
                    .await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
