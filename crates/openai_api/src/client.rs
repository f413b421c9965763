use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::config::OpenAiApiConfig;
use crate::error::{is_quota_message, parse_error_message, OpenAiApiError};
use crate::events::{AssembledResponse, ChatAccumulator, ChatStreamEvent};
use crate::headers::build_headers;
use crate::payload::ChatCompletionRequest;
use crate::retry::is_retryable_http_error;
use crate::sse::SseStreamParser;
use crate::url::normalize_chat_url;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct OpenAiApiClient {
    http: Client,
    config: OpenAiApiConfig,
}

#[derive(Debug, Clone)]
pub struct StreamResult {
    pub events: Vec<ChatStreamEvent>,
    pub response: AssembledResponse,
}

impl OpenAiApiClient {
    pub fn new(config: OpenAiApiConfig) -> Result<Self, OpenAiApiError> {
        let endpoint = normalize_chat_url(&config.base_url);
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(OpenAiApiError::InvalidBaseUrl(config.base_url.clone()));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(OpenAiApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OpenAiApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_url(&self.config.base_url)
    }

    pub fn build_headers(&self, user_agent: Option<&str>) -> Result<HeaderMap, OpenAiApiError> {
        let headers = build_headers(&self.config, user_agent)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| OpenAiApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    OpenAiApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::RequestBuilder, OpenAiApiError> {
        validate_request_payload_shape(request)?;

        let headers = self.build_headers(self.config.user_agent.as_deref())?;
        let payload = request_with_transport_defaults(request);
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(&payload))
    }

    pub async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, OpenAiApiError> {
        let policy = self.config.retry;
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=policy.max_retries {
            if is_cancelled(cancellation) {
                return Err(OpenAiApiError::Cancelled);
            }

            let response = self.build_request(request)?.send();
            let response = await_or_cancel(response, cancellation)
                .await?
                .map_err(OpenAiApiError::from);

            match response {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_else(|_| {
                            status
                                .canonical_reason()
                                .unwrap_or("request failed")
                                .to_string()
                        });
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if is_quota_message(&message) {
                        return Err(OpenAiApiError::QuotaExceeded { message });
                    }
                    if attempt < policy.max_retries
                        && is_retryable_http_error(status.as_u16(), &body)
                    {
                        warn!(%status, attempt, "chat request failed; retrying");
                        await_or_cancel(tokio::time::sleep(policy.delay(attempt)), cancellation)
                            .await?;
                        continue;
                    }

                    return Err(OpenAiApiError::Status(status, message));
                }
                Err(error) => {
                    let message = error.to_string();
                    last_error = Some(message);
                    if attempt < policy.max_retries {
                        debug!(attempt, error = ?last_error, "chat request transport failure; retrying");
                        await_or_cancel(tokio::time::sleep(policy.delay(attempt)), cancellation)
                            .await?;
                        continue;
                    }
                    return Err(OpenAiApiError::RetryExhausted {
                        status: last_status,
                        last_error,
                    });
                }
            }
        }

        Err(OpenAiApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Streams one completion, handing each event to `on_event` as it arrives.
    ///
    /// Fails if the server reports an error mid-stream or the stream ends
    /// before a finish reason or `[DONE]` sentinel.
    pub async fn stream_with_handler<F>(
        &self,
        request: &ChatCompletionRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_event: F,
    ) -> Result<AssembledResponse, OpenAiApiError>
    where
        F: FnMut(&ChatStreamEvent),
    {
        let response = self.send_with_retry(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();
        let mut accumulator = ChatAccumulator::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            if is_cancelled(cancellation) {
                return Err(OpenAiApiError::Cancelled);
            }
            let chunk = chunk.map_err(OpenAiApiError::from)?;
            for event in parser.feed(&chunk) {
                process_stream_event(&event, &mut accumulator, &mut on_event)?;
            }
        }

        if is_cancelled(cancellation) {
            return Err(OpenAiApiError::Cancelled);
        }
        if !accumulator.is_complete() {
            return Err(OpenAiApiError::StreamFailed {
                code: None,
                message: "stream ended before the model finished".to_owned(),
            });
        }

        Ok(accumulator.finish())
    }

    pub async fn stream(
        &self,
        request: &ChatCompletionRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamResult, OpenAiApiError> {
        let mut events = Vec::new();
        let response = self
            .stream_with_handler(request, cancellation, |event| {
                events.push(event.clone());
            })
            .await?;

        Ok(StreamResult { events, response })
    }
}

fn request_with_transport_defaults(request: &ChatCompletionRequest) -> ChatCompletionRequest {
    let mut payload = request.clone();
    payload.stream = true;
    if !payload.tools.is_empty() {
        if payload.tool_choice.is_none() {
            payload.tool_choice = Some("auto".to_owned());
        }
        if payload.parallel_tool_calls.is_none() {
            payload.parallel_tool_calls = Some(true);
        }
    }
    payload
}

fn validate_request_payload_shape(request: &ChatCompletionRequest) -> Result<(), OpenAiApiError> {
    if request.model.trim().is_empty() {
        return Err(OpenAiApiError::InvalidRequestPayload(
            "'model' must not be empty".to_owned(),
        ));
    }
    if request.messages.is_empty() {
        return Err(OpenAiApiError::InvalidRequestPayload(
            "'messages' must contain at least one message".to_owned(),
        ));
    }
    Ok(())
}

fn process_stream_event<F>(
    event: &ChatStreamEvent,
    accumulator: &mut ChatAccumulator,
    on_event: &mut F,
) -> Result<(), OpenAiApiError>
where
    F: FnMut(&ChatStreamEvent),
{
    if let ChatStreamEvent::Error { code, message } = event {
        return Err(OpenAiApiError::StreamFailed {
            code: code.clone(),
            message: message
                .clone()
                .or_else(|| code.clone())
                .unwrap_or_else(|| "model stream reported an error".to_owned()),
        });
    }

    accumulator.apply(event);
    on_event(event);
    Ok(())
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, OpenAiApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(OpenAiApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(OpenAiApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
