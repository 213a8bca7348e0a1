use crate::config::{AiSettings, ConfigMap};
use crate::errors::{AppError, AppResult};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

const SYSTEM_PROMPT: &str =
    "You are a professional Markdown assistant that helps users write, edit and improve Markdown content.";

pub const TEST_CONNECTION_MESSAGE: &str = "Test connection";

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub bearer_token: String,
    pub body: Value,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub enum TransportError {
    Timeout,
    Network(String),
}

/// Sends one JSON POST and reports the raw status and body.
pub trait ChatTransport: Send + Sync {
    fn post_json(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatTransport for HttpTransport {
    async fn post_json(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .bearer_auth(&request.bearer_token)
            .json(&request.body)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(error.to_string())
    }
}

/// Stateless pass-through to an OpenAI-compatible chat-completions endpoint.
/// One attempt per call; nothing is retried.
#[derive(Debug, Clone, Default)]
pub struct AiGateway<T = HttpTransport> {
    transport: T,
}

impl AiGateway<HttpTransport> {
    pub fn new() -> Self {
        Self::with_transport(HttpTransport::new())
    }
}

impl<T: ChatTransport> AiGateway<T> {
    pub fn with_transport(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the first completion's text.
    pub async fn chat(&self, config: &ConfigMap, message: &str, context: Option<&str>) -> AppResult<String> {
        let settings = AiSettings::from_config(config).inspect_err(|error| {
            tracing::error!(error = %error, "ai config incomplete");
        })?;

        let request = TransportRequest {
            url: settings.completions_url(),
            bearer_token: settings.api_key.clone(),
            body: json!({
                "model": settings.model,
                "messages": build_messages(message, context),
                "temperature": settings.temperature,
                "max_tokens": settings.max_tokens,
            }),
            timeout: Duration::from_secs(settings.timeout_secs),
        };

        tracing::info!(
            model = %settings.model,
            base_url = %settings.base_url,
            timeout_secs = settings.timeout_secs,
            message_chars = message.chars().count(),
            "sending ai request"
        );

        let response = match self.transport.post_json(request).await {
            Ok(response) => response,
            Err(TransportError::Timeout) => {
                let error = AppError::Timeout(format!(
                    "request timed out after {} seconds",
                    settings.timeout_secs
                ));
                tracing::error!(error = %error, "ai request failed");
                return Err(error);
            }
            Err(TransportError::Network(detail)) => {
                tracing::error!(error = %detail, "ai request failed");
                return Err(AppError::Network(detail));
            }
        };

        let text = extract_completion(&response).inspect_err(|error| {
            tracing::error!(error = %error, status = response.status, "ai response rejected");
        })?;
        tracing::info!(response_chars = text.chars().count(), "ai request succeeded");
        Ok(text)
    }

    /// One probe call with a temporary configuration that is never persisted.
    pub async fn test_connection(&self, api_key: &str, base_url: &str, model: &str) -> AppResult<()> {
        if api_key.trim().is_empty() {
            return Err(AppError::Validation("api_key must not be empty".to_string()));
        }

        let mut probe = ConfigMap::new();
        probe.insert("api_key".to_string(), json!(api_key));
        probe.insert("base_url".to_string(), json!(base_url));
        probe.insert("model".to_string(), json!(model));

        self.chat(&probe, TEST_CONNECTION_MESSAGE, None).await.map(|_| ())
    }
}

pub fn build_messages(message: &str, context: Option<&str>) -> Value {
    let mut system_prompt = SYSTEM_PROMPT.to_string();
    if let Some(context) = context.filter(|context| !context.is_empty()) {
        system_prompt.push_str("\n\nCurrent Markdown content:\n");
        system_prompt.push_str(context);
    }

    json!([
        { "role": "system", "content": system_prompt },
        { "role": "user", "content": message },
    ])
}

fn extract_completion(response: &TransportResponse) -> AppResult<String> {
    if response.status != 200 {
        return Err(AppError::Upstream(format!(
            "provider returned {}: {}",
            response.status, response.body
        )));
    }

    let parsed: Value = serde_json::from_str(&response.body)
        .map_err(|error| AppError::Upstream(format!("malformed provider response: {}", error)))?;

    parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| AppError::Upstream(format!("malformed provider response: {}", response.body)))
}

#[cfg(test)]
mod tests {
    use super::{AiGateway, ChatTransport, TransportError, TransportRequest, TransportResponse};
    use crate::config::ConfigMap;
    use crate::errors::AppError;
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeTransport {
        reply: Result<TransportResponse, TransportError>,
        calls: Mutex<Vec<TransportRequest>>,
    }

    impl FakeTransport {
        fn replying(status: u16, body: &str) -> Self {
            Self {
                reply: Ok(TransportResponse {
                    status,
                    body: body.to_string(),
                }),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: TransportError) -> Self {
            Self {
                reply: Err(error),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("calls").len()
        }
    }

    impl ChatTransport for FakeTransport {
        async fn post_json(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.calls.lock().expect("calls").push(request);
            self.reply.clone()
        }
    }

    fn complete_config() -> ConfigMap {
        json!({
            "api_key": "sk-test",
            "base_url": "http://provider.local/v1/",
            "model": "tiny",
            "temperature": 0.1,
            "max_tokens": 32,
            "timeout": 3
        })
        .as_object()
        .cloned()
        .expect("object")
    }

    const OK_BODY: &str = r##"{"choices":[{"message":{"role":"assistant","content":"# Hi"}}]}"##;

    #[tokio::test]
    async fn missing_api_key_fails_without_network_call() {
        let gateway = AiGateway::with_transport(FakeTransport::replying(200, OK_BODY));
        let mut config = complete_config();
        config.remove("api_key");

        let result = gateway.chat(&config, "hello", None).await;
        match result {
            Err(AppError::ConfigIncomplete(missing)) => assert_eq!(missing, vec!["api_key"]),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(gateway.transport().call_count(), 0);
    }

    #[tokio::test]
    async fn success_extracts_first_completion_and_shapes_request() {
        let gateway = AiGateway::with_transport(FakeTransport::replying(200, OK_BODY));

        let text = gateway
            .chat(&complete_config(), "make a heading", Some("some text"))
            .await
            .expect("chat");
        assert_eq!(text, "# Hi");

        let calls = gateway.transport().calls.lock().expect("calls");
        assert_eq!(calls.len(), 1);
        let request = &calls[0];
        assert_eq!(request.url, "http://provider.local/v1/chat/completions");
        assert_eq!(request.bearer_token, "sk-test");
        assert_eq!(request.timeout.as_secs(), 3);
        assert_eq!(request.body["model"], "tiny");
        assert_eq!(request.body["max_tokens"], 32);
        assert_eq!(request.body["messages"][0]["role"], "system");
        assert!(request.body["messages"][0]["content"]
            .as_str()
            .expect("system prompt")
            .ends_with("Current Markdown content:\nsome text"));
        assert_eq!(request.body["messages"][1]["content"], "make a heading");
    }

    #[tokio::test]
    async fn empty_context_leaves_system_prompt_unchanged() {
        let gateway = AiGateway::with_transport(FakeTransport::replying(200, OK_BODY));
        gateway.chat(&complete_config(), "hi", Some("")).await.expect("chat");

        let calls = gateway.transport().calls.lock().expect("calls");
        let system = calls[0].body["messages"][0]["content"].as_str().expect("system");
        assert!(!system.contains("Current Markdown content"));
    }

    #[tokio::test]
    async fn non_200_status_is_an_upstream_failure_with_body() {
        let gateway = AiGateway::with_transport(FakeTransport::replying(401, "bad key"));

        let result = gateway.chat(&complete_config(), "hi", None).await;
        match result {
            Err(AppError::Upstream(message)) => {
                assert!(message.contains("401"));
                assert!(message.contains("bad key"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn body_without_choices_is_malformed() {
        let gateway = AiGateway::with_transport(FakeTransport::replying(200, r#"{"choices":[]}"#));

        let result = gateway.chat(&complete_config(), "hi", None).await;
        assert!(matches!(result, Err(AppError::Upstream(message)) if message.contains("malformed")));
    }

    #[tokio::test]
    async fn timeout_and_network_failures_stay_distinct() {
        let timed_out = AiGateway::with_transport(FakeTransport::failing(TransportError::Timeout));
        let result = timed_out.chat(&complete_config(), "hi", None).await;
        assert!(matches!(result, Err(AppError::Timeout(message)) if message.contains("3 seconds")));
        assert_eq!(timed_out.transport().call_count(), 1);

        let refused = AiGateway::with_transport(FakeTransport::failing(TransportError::Network(
            "connection refused".to_string(),
        )));
        let result = refused.chat(&complete_config(), "hi", None).await;
        assert!(matches!(result, Err(AppError::Network(_))));
        assert_eq!(refused.transport().call_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_requires_api_key() {
        let gateway = AiGateway::with_transport(FakeTransport::replying(200, OK_BODY));

        let result = gateway.test_connection("", "http://provider.local/v1", "tiny").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(gateway.transport().call_count(), 0);

        gateway
            .test_connection("sk", "http://provider.local/v1", "tiny")
            .await
            .expect("probe");
        assert_eq!(gateway.transport().call_count(), 1);
    }
}
