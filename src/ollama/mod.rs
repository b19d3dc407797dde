//! Ollama 클라이언트 모듈
//!
//! 텍스트 생성 서비스(Ollama API)와의 통신을 담당합니다.
//! 모든 호출은 블로킹 방식이며, 네트워크 실패 시 지수 백오프로
//! 재시도합니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::RagError;

/// ping 용 짧은 타임아웃 (초)
const PING_TIMEOUT_SECS: u64 = 5;
/// 재시도 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;

// ============================================================================
// TextGenerator Trait
// ============================================================================

/// 텍스트 생성 트레이트
///
/// 추출기와 RAG 생성기가 사용하는 LLM 인터페이스입니다.
/// 테스트에서는 스크립트된 가짜 구현으로 대체합니다.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 프롬프트로 텍스트 생성
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
    ) -> Result<String, RagError>;
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// 재시도 정책
///
/// 최대 횟수와 초기 백오프를 지정합니다. 대기 시간은
/// `initial_backoff * 2^attempt` 로 증가합니다.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    /// 재시도 없음 (테스트용)
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    /// attempt 번째 실패 후 대기 시간
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_RETRIES)
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// /api/generate 요청 본문
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    keep_alive: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

/// /api/generate 응답 본문
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

// ============================================================================
// OllamaClient
// ============================================================================

/// Ollama API 클라이언트
///
/// 호출 간 로컬 상태를 유지하지 않습니다. HTTP 커넥션은 reqwest가
/// 내부적으로 재사용합니다.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    host: String,
    model: String,
    keep_alive: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OllamaClient {
    /// 새 클라이언트 생성
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        keep_alive: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RagError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RagError::transport)?;

        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
            keep_alive: keep_alive.into(),
            retry,
            client,
        })
    }

    /// 설정에서 생성용 클라이언트 생성
    pub fn from_config(config: &AppConfig) -> Result<Self, RagError> {
        Self::new(
            config.ollama_host.clone(),
            config.ollama_model.clone(),
            config.keep_alive.clone(),
            config.request_timeout,
            RetryPolicy::new(config.max_retries),
        )
    }

    /// 모델 이름 반환
    pub fn model(&self) -> &str {
        &self.model
    }

    /// 서비스 연결 확인 (GET /api/tags)
    ///
    /// 배치 작업 전 사전 점검용입니다. 실패해도 에러를 내지 않고
    /// false를 반환합니다.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/api/tags", self.host);

        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(PING_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("Ping failed: {}", e);
                false
            }
        }
    }

    /// 전송 계층 호출 (재시도 포함)
    ///
    /// 연결 실패와 비정상 상태 코드는 재시도 대상이며, 재시도를
    /// 모두 소진하면 마지막 에러를 반환합니다. 본문 파싱 실패는
    /// 즉시 MalformedResponse로 반환합니다.
    async fn post_generate(&self, request: &GenerateRequest<'_>) -> Result<String, RagError> {
        let url = format!("{}/api/generate", self.host);
        let mut last_error = RagError::Transport("request not attempted".to_string());

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let backoff = self.retry.backoff(attempt - 1);
                tracing::warn!(
                    "Request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.retry.max_retries
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self.client.post(&url).json(request).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = RagError::transport(e);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                last_error =
                    RagError::Transport(format!("server returned status {}", status));
                continue;
            }

            // 본문 수신 중 끊김도 전송 에러로 재시도
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = RagError::transport(e);
                    continue;
                }
            };

            let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
                RagError::MalformedResponse(format!("invalid generate response: {}", e))
            })?;

            return Ok(parsed.response);
        }

        Err(last_error)
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
    ) -> Result<String, RagError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
            keep_alive: &self.keep_alive,
            options: GenerateOptions { temperature },
        };

        tracing::debug!(model = %self.model, "Sending generate request");
        self.post_generate(&request).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_none() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.backoff(0), Duration::ZERO);
    }

    #[test]
    fn test_host_trailing_slash_trimmed() {
        let client = OllamaClient::new(
            "http://localhost:11434/",
            "test-model",
            "5m",
            Duration::from_secs(10),
            RetryPolicy::none(),
        )
        .unwrap();

        assert_eq!(client.host, "http://localhost:11434");
        assert_eq!(client.model(), "test-model");
    }

    #[tokio::test]
    async fn test_body_read_failure_is_retried() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        // Content-Length보다 짧은 본문을 보내고 연결을 끊는 서버
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut served = 0u32;
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n{\"response\"",
                    )
                    .await;
                drop(socket);
                served += 1;
            }
            served
        });

        let client = OllamaClient::new(
            format!("http://{}", addr),
            "test-model",
            "0",
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 1,
                initial_backoff: Duration::ZERO,
            },
        )
        .unwrap();

        let result = client.generate("hello", None, 0.7).await;
        assert!(matches!(result, Err(RagError::Transport(_))));

        // 최초 시도 + 재시도 1회 = 연결 2회
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_generate_against_unreachable_host_is_transport_error() {
        // 열려 있지 않은 포트로 연결 시도
        let client = OllamaClient::new(
            "http://127.0.0.1:1",
            "test-model",
            "0",
            Duration::from_millis(200),
            RetryPolicy::none(),
        )
        .unwrap();

        let result = client.generate("hello", None, 0.7).await;
        assert!(matches!(result, Err(RagError::Transport(_))));

        assert!(!client.ping().await);
    }
}
