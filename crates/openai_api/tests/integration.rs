use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use openai_api::{
    ChatCompletionRequest, ChatMessage, ChatStreamEvent, FinishReason, OpenAiApiClient,
    OpenAiApiConfig, OpenAiApiError, RetryPolicy,
};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

#[derive(Clone)]
struct ResponseChunk {
    delay_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Clone)]
enum ScriptedResponse {
    Respond {
        status: u16,
        content_type: &'static str,
        chunks: Vec<ResponseChunk>,
    },
    Reset,
}

struct ScriptedServer {
    base_url: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let request_count = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let base_url = format!("http://{addr}/v1");

        let handle = tokio::spawn({
            let scripts = Arc::clone(&scripts);
            let request_count = Arc::clone(&request_count);
            let requests = Arc::clone(&requests);

            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let scripts = Arc::clone(&scripts);
                    let request_count = Arc::clone(&request_count);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        serve_one(socket, scripts, request_count, requests).await;
                    });
                }
            }
        });

        Self {
            base_url,
            request_count,
            requests,
            handle,
        }
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Acquire)
    }

    fn first_request(&self) -> String {
        self.requests
            .lock()
            .expect("requests")
            .first()
            .cloned()
            .unwrap_or_default()
    }

    fn shutdown(&self) {
        self.handle.abort();
    }
}

fn response_sse(status: u16, frames: &[&str]) -> ScriptedResponse {
    ScriptedResponse::Respond {
        status,
        content_type: "text/event-stream",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: sse_frames(frames),
        }],
    }
}

fn response_json(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse::Respond {
        status,
        content_type: "application/json",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: body.as_bytes().to_vec(),
        }],
    }
}

fn sse_frames(frames: &[&str]) -> Vec<u8> {
    let mut body = String::new();

    for frame in frames {
        body.push_str("data: ");
        body.push_str(frame);
        body.push_str("\n\n");
    }

    body.into_bytes()
}

fn client_for(server: &ScriptedServer) -> OpenAiApiClient {
    let config = OpenAiApiConfig::new("sk-test")
        .with_base_url(&server.base_url)
        .with_retry(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        });
    OpenAiApiClient::new(config).expect("client")
}

fn request() -> ChatCompletionRequest {
    ChatCompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")])
}

#[tokio::test]
async fn stream_integration_successful_completion() {
    let server = ScriptedServer::new(vec![response_sse(
        200,
        &[
            r#"{"choices":[{"delta":{"content":"Your balance "}}]}"#,
            r#"{"choices":[{"delta":{"content":"is 0.42 ETH."},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ],
    )])
    .await;
    let client = client_for(&server);

    let result = client
        .stream(&request(), None)
        .await
        .expect("stream should succeed");

    assert_eq!(result.response.text, "Your balance is 0.42 ETH.");
    assert_eq!(result.response.finish_reason, Some(FinishReason::Stop));
    assert!(result.response.tool_calls.is_empty());
    assert_eq!(result.events.len(), 4);

    let raw = server.first_request();
    assert!(raw.starts_with("POST /v1/chat/completions "), "{raw}");
    assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test"));

    server.shutdown();
}

#[tokio::test]
async fn stream_integration_assembles_parallel_tool_calls() {
    let server = ScriptedServer::new(vec![response_sse(
        200,
        &[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"get_balance","arguments":""}},{"index":1,"id":"call_b","type":"function","function":{"name":"get_all_pairs","arguments":"{"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{}"}},{"index":1,"function":{"arguments":"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ],
    )])
    .await;
    let client = client_for(&server);

    let result = client.stream(&request(), None).await.expect("stream");

    let calls: Vec<(String, String, String)> = result
        .response
        .tool_calls
        .into_iter()
        .map(|call| (call.id, call.name, call.arguments))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("call_a".to_string(), "get_balance".to_string(), "{}".to_string()),
            ("call_b".to_string(), "get_all_pairs".to_string(), "{}".to_string()),
        ]
    );

    server.shutdown();
}

#[tokio::test]
async fn stream_integration_mid_stream_error_fails() {
    let server = ScriptedServer::new(vec![response_sse(
        200,
        &[
            r#"{"choices":[{"delta":{"content":"partial"}}]}"#,
            r#"{"error":{"message":"The server had an error","type":"server_error"}}"#,
        ],
    )])
    .await;
    let client = client_for(&server);

    let mut seen = Vec::new();
    let error = client
        .stream_with_handler(&request(), None, |event| seen.push(event.clone()))
        .await
        .expect_err("error event fails the stream");

    assert!(matches!(error, OpenAiApiError::StreamFailed { .. }), "{error}");
    assert_eq!(
        seen,
        vec![ChatStreamEvent::ContentDelta {
            delta: "partial".to_string()
        }]
    );

    server.shutdown();
}

#[tokio::test]
async fn stream_integration_truncated_stream_fails() {
    let server = ScriptedServer::new(vec![response_sse(
        200,
        &[r#"{"choices":[{"delta":{"content":"cut off"}}]}"#],
    )])
    .await;
    let client = client_for(&server);

    let error = client
        .stream(&request(), None)
        .await
        .expect_err("no finish reason");

    assert!(error.to_string().contains("before the model finished"), "{error}");

    server.shutdown();
}

#[tokio::test]
async fn stream_integration_retryable_then_success() {
    let server = ScriptedServer::new(vec![
        response_json(503, r#"{"error":{"message":"overloaded"}}"#),
        response_sse(
            200,
            &[r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#],
        ),
    ])
    .await;
    let client = client_for(&server);

    let result = timeout(Duration::from_secs(5), client.stream(&request(), None))
        .await
        .expect("retry path should be bounded")
        .expect("stream should eventually succeed");

    assert_eq!(result.response.text, "ok");
    assert_eq!(server.request_count(), 2);

    server.shutdown();
}

#[tokio::test]
async fn stream_integration_non_retryable_status_fails_explicitly() {
    let server = ScriptedServer::new(vec![response_json(
        400,
        r#"{"error":{"message":"invalid request"}}"#,
    )])
    .await;
    let client = client_for(&server);

    let error = client
        .stream(&request(), None)
        .await
        .expect_err("stream should fail");

    assert!(matches!(&error, OpenAiApiError::Status(code, message) if code.as_u16() == 400 && message == "invalid request"));
    assert_eq!(server.request_count(), 1);

    server.shutdown();
}

#[tokio::test]
async fn stream_integration_quota_is_not_retried() {
    let server = ScriptedServer::new(vec![response_json(
        429,
        r#"{"error":{"message":"You exceeded your current quota","code":"insufficient_quota"}}"#,
    )])
    .await;
    let client = client_for(&server);

    let error = client
        .stream(&request(), None)
        .await
        .expect_err("quota");

    assert!(matches!(error, OpenAiApiError::QuotaExceeded { .. }));
    assert_eq!(server.request_count(), 1);

    server.shutdown();
}

#[tokio::test]
async fn stream_integration_cancellation_during_stream() {
    let server = ScriptedServer::new(vec![ScriptedResponse::Respond {
        status: 200,
        content_type: "text/event-stream",
        chunks: vec![
            ResponseChunk {
                delay_ms: 0,
                bytes: sse_frames(&[r#"{"choices":[{"delta":{"content":"stream"}}]}"#]),
            },
            ResponseChunk {
                delay_ms: 400,
                bytes: sse_frames(&[r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#]),
            },
        ],
    }])
    .await;
    let client = Arc::new(client_for(&server));

    let cancellation = Arc::new(AtomicBool::new(false));
    let stream_task = tokio::spawn({
        let client = Arc::clone(&client);
        let cancellation = Arc::clone(&cancellation);
        async move { client.stream(&request(), Some(&cancellation)).await }
    });

    sleep(Duration::from_millis(150)).await;
    cancellation.store(true, Ordering::Release);

    let result = timeout(Duration::from_secs(5), stream_task)
        .await
        .expect("stream task should resolve")
        .expect("join handle should resolve")
        .expect_err("cancellation should abort stream");

    assert!(matches!(result, OpenAiApiError::Cancelled));
    server.shutdown();
}

#[tokio::test]
async fn stream_integration_connection_reset_then_retry_exhausted() {
    let server = ScriptedServer::new(vec![
        ScriptedResponse::Reset,
        ScriptedResponse::Reset,
        ScriptedResponse::Reset,
        ScriptedResponse::Reset,
    ])
    .await;
    let client = client_for(&server);

    let result = timeout(Duration::from_secs(10), client.stream(&request(), None))
        .await
        .expect("retry path should resolve")
        .expect_err("connection reset should surface as failure");

    assert!(matches!(
        result,
        OpenAiApiError::RetryExhausted { status: None, .. }
    ));
    assert_eq!(server.request_count(), 4);

    server.shutdown();
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Vec<ScriptedResponse>>,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    let Ok(head) = read_request_headers(&mut socket).await else {
        return;
    };
    requests.lock().expect("requests").push(head);

    let index = request_count.fetch_add(1, Ordering::AcqRel);
    let response = scripts
        .get(index)
        .cloned()
        .unwrap_or_else(|| response_json(500, r#"{"error":"unexpected request"}"#));

    match response {
        ScriptedResponse::Reset => {}
        ScriptedResponse::Respond {
            status,
            content_type,
            chunks,
        } => {
            let headers = format!(
                "HTTP/1.1 {status} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
                status_reason(status),
                content_type,
            );

            if socket.write_all(headers.as_bytes()).await.is_err() {
                return;
            }

            for chunk in chunks {
                if chunk.delay_ms > 0 {
                    sleep(Duration::from_millis(chunk.delay_ms)).await;
                }
                let prefix = format!("{:X}\r\n", chunk.bytes.len());
                if socket.write_all(prefix.as_bytes()).await.is_err() {
                    return;
                }
                if socket.write_all(&chunk.bytes).await.is_err() {
                    return;
                }
                if socket.write_all(b"\r\n").await.is_err() {
                    return;
                }
            }

            let _ = socket.write_all(b"0\r\n\r\n").await;
            let _ = socket.shutdown().await;
        }
    }
}

async fn read_request_headers(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 2048];

    loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buffer[..n]);
        if request.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&request).into_owned())
}
