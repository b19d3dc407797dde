//! 임베딩 모듈 - Ollama API를 통한 텍스트 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환합니다. 인덱스 빌드와 질의 시점에
//! 반드시 같은 프로바이더(같은 fingerprint)를 사용해야 합니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::RagError;
use crate::ollama::RetryPolicy;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut results = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding batch {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 임베딩 공간 식별자
    ///
    /// 인덱스 아티팩트에 저장되며, 로드/질의 시점에 일치 여부를
    /// 검사합니다. 모델이 다르면 유사도가 조용히 무의미해지기
    /// 때문입니다.
    fn fingerprint(&self) -> String;
}

// ============================================================================
// Wire Types
// ============================================================================

/// /api/embeddings 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// /api/embeddings 응답 본문
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

// ============================================================================
// OllamaEmbedding
// ============================================================================

/// Ollama 임베딩 구현체
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    host: String,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OllamaEmbedding {
    /// 새 임베딩 프로바이더 생성
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
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
            dimension,
            retry,
            client,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &AppConfig) -> Result<Self, RagError> {
        Self::new(
            config.ollama_host.clone(),
            config.embedding_model.clone(),
            config.vector_dim,
            config.request_timeout,
            RetryPolicy::new(config.max_retries),
        )
    }

    async fn post_embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let url = format!("{}/api/embeddings", self.host);
        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let mut last_error = RagError::Transport("request not attempted".to_string());

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let backoff = self.retry.backoff(attempt - 1);
                tracing::warn!(
                    "Embedding request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.retry.max_retries
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self.client.post(&url).json(&request).send().await {
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
            let parsed: EmbedResponse = serde_json::from_str(&body).map_err(|e| {
                RagError::MalformedResponse(format!("invalid embedding response: {}", e))
            })?;

            if parsed.embedding.len() != self.dimension {
                return Err(RagError::MalformedResponse(format!(
                    "embedding dimension {} does not match expected {}",
                    parsed.embedding.len(),
                    self.dimension
                )));
            }

            return Ok(parsed.embedding);
        }

        Err(last_error)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        // 빈 텍스트는 영벡터로 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        self.post_embed(text).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn fingerprint(&self) -> String {
        format!("{}/{}", self.model, self.dimension)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_embedder() -> OllamaEmbedding {
        OllamaEmbedding::new(
            "http://127.0.0.1:1",
            "bge-m3",
            8,
            Duration::from_millis(200),
            RetryPolicy::none(),
        )
        .unwrap()
    }

    #[test]
    fn test_fingerprint_includes_model_and_dimension() {
        let embedder = test_embedder();
        assert_eq!(embedder.fingerprint(), "bge-m3/8");
        assert_eq!(embedder.dimension(), 8);
    }

    #[tokio::test]
    async fn test_empty_text_embeds_to_zero_vector() {
        let embedder = test_embedder();
        let vector = embedder.embed("   ").await.unwrap();
        assert_eq!(vector.len(), 8);
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let embedder = test_embedder();
        let result = embedder.embed("cyberpunk cat").await;
        assert!(matches!(result, Err(RagError::Transport(_))));
    }
}
