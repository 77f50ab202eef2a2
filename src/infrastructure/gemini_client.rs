use crate::infrastructure::config::SuggestionServiceConfig;
use crate::infrastructure::error::SchedulerError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const API_KEY_HEADER: &str = "x-goog-api-key";
const GENERATE_CONTENT_ACTION: &str = "generateContent";

/// One outbound generation call. Everything that influences sampling is explicit.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub seed: u32,
    pub candidate_count: u32,
    pub max_output_tokens: u32,
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Returns the raw text of the first candidate. Transport and 408/429/5xx
    /// failures are `TransientService`; other refusals are `ServiceUnavailable`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, SchedulerError>;
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: Url,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        config: &SuggestionServiceConfig,
    ) -> Result<Self, SchedulerError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SchedulerError::InvalidConfig("api key must not be empty".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|error| {
                SchedulerError::InvalidConfig(format!("failed to build http client: {error}"))
            })?;
        Ok(Self {
            client,
            api_key,
            endpoint: Self::generate_endpoint(&config.base_url, &config.model)?,
        })
    }

    fn generate_endpoint(base_url: &str, model: &str) -> Result<Url, SchedulerError> {
        let mut url = Url::parse(base_url).map_err(|error| {
            SchedulerError::InvalidConfig(format!("invalid suggestion service base url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SchedulerError::InvalidConfig(
                    "suggestion service base URL cannot be a base".to_string(),
                )
            })?;
            segments.pop_if_empty();
            segments.push("models");
            segments.push(&format!("{}:{GENERATE_CONTENT_ACTION}", model.trim()));
        }
        Ok(url)
    }

    fn http_error(status: StatusCode, body: &str) -> SchedulerError {
        let message = if body.trim().is_empty() {
            format!("gemini api error: http {}", status.as_u16())
        } else {
            format!("gemini api error: http {}; body={body}", status.as_u16())
        };
        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            SchedulerError::TransientService(message)
        } else {
            SchedulerError::ServiceUnavailable(message)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    seed: u32,
    candidate_count: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<ResponseCandidate>>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, SchedulerError> {
        let payload = GenerateContentRequest {
            contents: [RequestContent {
                role: "user",
                parts: [RequestPart { text: &request.prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                seed: request.seed,
                candidate_count: request.candidate_count,
                max_output_tokens: request.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                SchedulerError::TransientService(format!(
                    "network error while calling gemini: {error}"
                ))
            })?;

        let status = response.status();
        debug!(status = status.as_u16(), "received gemini response");
        let body = response.text().await.map_err(|error| {
            SchedulerError::TransientService(format!("failed reading gemini response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|error| {
            SchedulerError::MalformedResponse(format!("invalid gemini payload: {error}"))
        })?;
        let text: String = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.text)
            .collect();

        if text.trim().is_empty() {
            return Err(SchedulerError::MalformedResponse(
                "gemini response contained no candidate text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn test_client(server: &MockServer) -> GeminiClient {
        let config = SuggestionServiceConfig {
            base_url: format!("{}/v1beta", server.uri()),
            timeout_seconds: 5,
            ..SuggestionServiceConfig::default()
        };
        GeminiClient::new("test-api-key", &config).expect("client")
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "Suggest a time".to_string(),
            temperature: 0.0,
            seed: 42,
            candidate_count: 1,
            max_output_tokens: 256,
        }
    }

    #[tokio::test]
    async fn sends_determinism_controls_and_joins_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .and(header("x-goog-api-key", "test-api-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "Suggest a time"}]}],
                "generationConfig": {
                    "temperature": 0.0,
                    "seed": 42,
                    "candidateCount": 1,
                    "maxOutputTokens": 256
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [
                    {"text": "{\"suggestions\":"},
                    {"text": " []}"}
                ]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = test_client(&server).generate(&request()).await.expect("generate");

        assert_eq!(text, "{\"suggestions\": []}");
    }

    #[tokio::test]
    async fn classifies_retryable_statuses_as_transient() {
        for status in [408u16, 429, 500, 503] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_string("try later"))
                .mount(&server)
                .await;

            let result = test_client(&server).generate(&request()).await;

            match result {
                Err(SchedulerError::TransientService(message)) => {
                    assert!(message.contains("try later"), "status {status}: {message}");
                }
                other => panic!("status {status} should be transient, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn classifies_client_errors_as_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let result = test_client(&server).generate(&request()).await;

        assert!(matches!(result, Err(SchedulerError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn empty_candidates_are_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let result = test_client(&server).generate(&request()).await;

        assert!(matches!(result, Err(SchedulerError::MalformedResponse(_))));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash_and_rejects_blank_key() {
        let endpoint =
            GeminiClient::generate_endpoint("https://example.test/v1beta/", "gemini-1.5-flash")
                .expect("endpoint");
        assert_eq!(
            endpoint.as_str(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert!(matches!(
            GeminiClient::new("  ", &SuggestionServiceConfig::default()),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
