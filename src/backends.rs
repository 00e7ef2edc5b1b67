//! HTTP clients for the upstream model backends.

use crate::constants::*;
use crate::hardening::{CircuitBreaker, CircuitState};
use crate::main_helper::{Args, BackendKeys};
use crate::specs::openai::*;
use crate::types::*;
use axum::http::{HeaderMap, StatusCode};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

pub struct Backend {
    pub kind: BackendKind,
    pub url: String,
    pub model: String,
    api_key: Option<String>,
    breaker: Option<CircuitBreaker>,
}

impl Backend {
    pub fn new(kind: BackendKind, url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            kind,
            url: url.to_string(),
            model: model.to_string(),
            api_key,
            breaker: None,
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && !self.url.trim().is_empty()
    }

    /// Configured and not currently short-circuited.
    pub async fn is_available(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        match &self.breaker {
            Some(b) => b.allows_call().await,
            None => true,
        }
    }

    pub async fn circuit_state(&self) -> Option<CircuitState> {
        match &self.breaker {
            Some(b) => Some(b.state().await),
            None => None,
        }
    }

    pub async fn record_outcome(&self, success: bool) {
        if let Some(b) = &self.breaker {
            if success {
                b.record_success().await;
            } else {
                b.record_failure().await;
            }
        }
    }

    fn bearer(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(k) => Ok(k),
            None => Err(GatewayError::BackendUnavailable(
                self.kind,
                "no API key configured".to_string(),
            )
            .into()),
        }
    }
}

pub struct BackendRegistry {
    pub chat: Backend,
    pub reasoning: Backend,
    pub image: Backend,
    pub title_model: String,
    pub title_timeout: Duration,
}

impl BackendRegistry {
    pub fn from_args(args: &Args, keys: BackendKeys) -> Self {
        let recovery = Duration::from_secs(args.circuit_recovery_secs);
        Self {
            chat: Backend::new(BackendKind::Chat, &args.chat_url, &args.chat_model, Some(keys.chat)),
            reasoning: Backend::new(
                BackendKind::Reasoning,
                &args.reasoning_url,
                &args.reasoning_model,
                keys.reasoning,
            )
            .with_breaker(CircuitBreaker::new(
                "reasoning",
                args.circuit_breaker_threshold,
                recovery,
            )),
            image: Backend::new(BackendKind::Image, &args.image_url, &args.image_model, keys.image)
                .with_breaker(CircuitBreaker::new(
                    "image",
                    args.circuit_breaker_threshold,
                    recovery,
                )),
            title_model: args.title_model.clone(),
            title_timeout: Duration::from_secs(args.title_timeout_secs),
        }
    }
}

/// Point in time after which no backend call for the request may continue.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    /// Caller-supplied budget from the deadline header, capped at `max`. A
    /// zero budget counts as not supplied.
    pub fn from_headers(headers: &HeaderMap, max: Duration) -> Self {
        let requested = headers
            .get(DEADLINE_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis);
        match requested {
            Some(d) if !d.is_zero() && d < max => Self::after(d),
            _ => Self::after(max),
        }
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// The earlier of this deadline and `now + budget`.
    pub fn capped(&self, budget: Duration) -> Self {
        Self(self.0.min(Instant::now() + budget))
    }

    pub async fn run<F, T>(&self, kind: BackendKind, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.0, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::DeadlineExceeded(kind).into()),
        }
    }
}

/// Maps a non-2xx upstream status onto the gateway's error taxonomy.
pub fn classify_failure(kind: BackendKind, status: StatusCode, body: String) -> GatewayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYMENT_REQUIRED => {
            GatewayError::BackendTransient(status, body)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::BackendUnavailable(
            kind,
            format!("upstream rejected credential ({})", status),
        ),
        _ => GatewayError::Upstream(status, body),
    }
}

async fn post_json<B: serde::Serialize>(
    client: &reqwest::Client,
    backend: &Backend,
    body: &B,
) -> Result<reqwest::Response> {
    let response = client
        .post(&backend.url)
        .header("Authorization", format!("Bearer {}", backend.bearer()?))
        .json(body)
        .send()
        .await
        .map_err(GatewayError::Network)?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_body = match response.text().await {
        Ok(text) => text,
        Err(_) => "Unknown error".to_string(),
    };
    tracing::warn!(
        "[☁️  -> ⚙️ ] {} backend answered {}: {}",
        backend.kind,
        status,
        crate::text::prefix_chars(&error_body, 200)
    );
    Err(classify_failure(backend.kind, status, error_body).into())
}

/// Single-shot completion; returns the full answer text.
pub async fn complete(
    client: &reqwest::Client,
    backend: &Backend,
    request: &OpenAiRequest,
    deadline: Deadline,
    kind: BackendKind,
) -> Result<String> {
    deadline
        .run(kind, async {
            let response = post_json(client, backend, request).await?;
            let completion: OpenAiCompletion = response.json().await.map_err(|e| {
                GatewayError::MalformedUpstream(format!("{} completion body: {}", kind, e))
            })?;
            match completion.first_text() {
                Some(text) => Ok(text.to_string()),
                None => Err(GatewayError::MalformedUpstream(format!(
                    "{} completion carried no message content",
                    kind
                ))
                .into()),
            }
        })
        .await
}

/// Opens a natively streaming completion. Only the response head is awaited
/// here; the body is consumed by the stream assembler.
pub async fn open_stream(
    client: &reqwest::Client,
    backend: &Backend,
    request: &OpenAiRequest,
    deadline: Deadline,
) -> Result<reqwest::Response> {
    deadline
        .run(backend.kind, post_json(client, backend, request))
        .await
}

pub async fn generate_image(
    client: &reqwest::Client,
    backend: &Backend,
    prompt: &str,
    deadline: Deadline,
) -> Result<ImageResult> {
    let request = ImageGenerationRequest {
        model: backend.model.clone(),
        prompt: prompt.to_string(),
        n: 1,
        size: DEFAULT_IMAGE_SIZE.to_string(),
    };

    deadline
        .run(BackendKind::Image, async {
            let response = post_json(client, backend, &request).await?;
            let body: ImageGenerationResponse = response.json().await.map_err(|e| {
                GatewayError::MalformedUpstream(format!("image response body: {}", e))
            })?;
            let first = match body.data.first() {
                Some(img) => img,
                None => {
                    return Err(GatewayError::MalformedUpstream(
                        "image response contained no images".to_string(),
                    )
                    .into())
                }
            };
            let url = match first.display_url() {
                Some(u) => u,
                None => {
                    return Err(GatewayError::MalformedUpstream(
                        "image response had neither url nor b64_json".to_string(),
                    )
                    .into())
                }
            };
            Ok(ImageResult {
                url,
                caption: image_caption(prompt, first.revised_prompt.as_deref()),
            })
        })
        .await
}

fn image_caption(prompt: &str, revised: Option<&str>) -> String {
    let subject = match revised {
        Some(r) if !r.trim().is_empty() => r.trim(),
        _ => prompt.trim(),
    };
    format!(
        "Here is the generated image for: \"{}\"",
        crate::text::prefix_chars(subject, 160)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses_pass_through() {
        let err = classify_failure(BackendKind::Chat, StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, GatewayError::BackendTransient(s, _) if s == StatusCode::TOO_MANY_REQUESTS));
        let err = classify_failure(BackendKind::Chat, StatusCode::PAYMENT_REQUIRED, "quota".into());
        assert!(matches!(err, GatewayError::BackendTransient(s, _) if s == StatusCode::PAYMENT_REQUIRED));
    }

    #[test]
    fn test_credential_rejection_means_unavailable() {
        let err = classify_failure(BackendKind::Image, StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(err, GatewayError::BackendUnavailable(BackendKind::Image, _)));
    }

    #[test]
    fn test_deadline_header_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(DEADLINE_HEADER, "999999999".parse().unwrap());
        let max = Duration::from_secs(5);
        let deadline = Deadline::from_headers(&headers, max);
        assert!(deadline.instant() <= Instant::now() + max);
    }

    #[test]
    fn test_zero_deadline_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(DEADLINE_HEADER, "0".parse().unwrap());
        let max = Duration::from_secs(5);
        let deadline = Deadline::from_headers(&headers, max);
        assert!(deadline.instant() > Instant::now() + Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_deadline_expiry_maps_to_error() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result: Result<()> = deadline
            .run(BackendKind::Reasoning, async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        match result {
            Err(e) => assert!(matches!(e.inner, GatewayError::DeadlineExceeded(BackendKind::Reasoning))),
            Ok(_) => panic!("Expected deadline error"),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_backend_is_unavailable() {
        let backend = Backend::new(BackendKind::Image, "http://localhost/img", "m", None);
        assert!(!backend.is_available().await);
    }

    #[test]
    fn test_caption_prefers_revised_prompt() {
        assert_eq!(
            image_caption("a red car", Some("A glossy red sports car")),
            "Here is the generated image for: \"A glossy red sports car\""
        );
        assert_eq!(image_caption("a red car", None), "Here is the generated image for: \"a red car\"");
    }
}
