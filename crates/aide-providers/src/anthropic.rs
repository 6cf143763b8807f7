//! Anthropic Messages API provider.
//!
//! Only the streaming endpoint is used. The response body is split into lines
//! by a background task and handed over through a channel of capacity one, so
//! the reader is never more than one line ahead of the consumer.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::streaming::LineSplitter;
use crate::{CompletionRequest, LLMProvider, LineStream, ProviderError, Tool};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    api_version: String,
    max_tokens: Option<u32>,
    name: String,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        api_version: Option<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("Anthropic API key is empty; set provider.api_key or ANTHROPIC_API_KEY");
        }

        Ok(Self {
            client: Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_version: api_version.unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            max_tokens,
            name: "anthropic".to_string(),
        })
    }

    pub(crate) fn create_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or_else(|| self.max_tokens()),
            "system": request.system,
            "tools": convert_tools(&request.tools),
            "stream": true,
            "messages": request.messages,
        })
    }

    async fn pump_lines(
        mut stream: impl futures_util::Stream<Item = reqwest::Result<Bytes>> + Unpin,
        tx: mpsc::Sender<Result<String>>,
    ) {
        let mut splitter = LineSplitter::new();

        while let Some(chunk_result) = stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    for line in splitter.push(&chunk) {
                        if tx.send(Ok(line)).await.is_err() {
                            debug!("Receiver dropped, stopping stream");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Stream error: {}", e);
                    let _ = tx
                        .send(Err(ProviderError::Stream(e.to_string()).into()))
                        .await;
                    return;
                }
            }
        }

        if let Some(tail) = splitter.finish() {
            let _ = tx.send(Ok(tail)).await;
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<LineStream> {
        debug!(
            "Processing Anthropic streaming request with {} messages and {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let body = self.create_request_body(&request);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: error_text,
            }
            .into());
        }

        let stream = response.bytes_stream();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            Self::pump_lines(stream, tx).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(2048)
    }
}

fn convert_tools(tools: &[Tool]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect()
}
