//! 설정 모듈
//!
//! 프로세스 시작 시 환경변수에서 한 번 읽어 각 컴포넌트에 명시적으로
//! 전달합니다. 코어 컴포넌트는 환경변수를 직접 읽지 않습니다.

use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// 기본 Ollama 엔드포인트
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
/// 기본 생성 모델
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:32b";
/// 기본 임베딩 모델
pub const DEFAULT_EMBEDDING_MODEL: &str = "bge-m3";
/// 기본 임베딩 차원 (bge-m3 기준, 모델 변경 시 함께 조정)
pub const DEFAULT_VECTOR_DIM: usize = 1024;
/// 기본 keep_alive (첫 요청 지연 감소)
pub const DEFAULT_KEEP_ALIVE: &str = "5m";
/// 기본 요청 타임아웃 (초)
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// 기본 최대 재시도 횟수
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// 기본 검색 Top-K
pub const DEFAULT_TOP_K: usize = 5;

// ============================================================================
// AppConfig
// ============================================================================

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Ollama 서비스 주소
    pub ollama_host: String,
    /// 생성용 모델 이름
    pub ollama_model: String,
    /// 임베딩용 모델 이름
    pub embedding_model: String,
    /// 임베딩 차원
    pub vector_dim: usize,
    /// Ollama keep_alive 값 ("5m", "0" 등)
    pub keep_alive: String,
    /// 요청 타임아웃
    pub request_timeout: Duration,
    /// 네트워크 재시도 횟수
    pub max_retries: u32,
    /// 기본 검색 Top-K
    pub top_k: usize,
    /// 데이터 디렉토리
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// 환경변수에서 설정 로드
    ///
    /// 지원 변수: OLLAMA_HOST, OLLAMA_MODEL, EMBEDDING_MODEL,
    /// OLLAMA_KEEP_ALIVE, REQUEST_TIMEOUT, MAX_RETRIES, TOP_K,
    /// PROMPT_RAG_DATA_DIR
    pub fn from_env() -> Self {
        let timeout_secs = env_parse("REQUEST_TIMEOUT", DEFAULT_TIMEOUT_SECS);

        Self {
            ollama_host: env_or("OLLAMA_HOST", DEFAULT_OLLAMA_HOST),
            ollama_model: env_or("OLLAMA_MODEL", DEFAULT_OLLAMA_MODEL),
            embedding_model: env_or("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            vector_dim: env_parse("VECTOR_DIM", DEFAULT_VECTOR_DIM),
            keep_alive: env_or("OLLAMA_KEEP_ALIVE", DEFAULT_KEEP_ALIVE),
            request_timeout: Duration::from_secs(timeout_secs),
            max_retries: env_parse("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            top_k: env_parse("TOP_K", DEFAULT_TOP_K),
            data_dir: std::env::var("PROMPT_RAG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| get_data_dir()),
        }
    }

    /// 구조화 레코드 저장 경로 (JSONL)
    pub fn structured_path(&self) -> PathBuf {
        self.data_dir.join("processed").join("structured.jsonl")
    }

    /// 추출 실패 기록 경로 (JSONL)
    pub fn failed_path(&self) -> PathBuf {
        self.data_dir.join("processed").join("failed.jsonl")
    }

    /// 벡터 아티팩트 경로 (바이너리)
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("db").join("prompts.index")
    }

    /// 인덱스 메타데이터 경로 (JSONL)
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("db").join("metadata.jsonl")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            vector_dim: DEFAULT_VECTOR_DIM,
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            top_k: DEFAULT_TOP_K,
            data_dir: get_data_dir(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 데이터 디렉토리 경로 (~/.prompt-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".prompt-rag")
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.ollama_host, DEFAULT_OLLAMA_HOST);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_data_paths() {
        let config = AppConfig {
            data_dir: PathBuf::from("/tmp/prompt-rag-test"),
            ..Default::default()
        };

        assert!(config.structured_path().ends_with("processed/structured.jsonl"));
        assert!(config.index_path().ends_with("db/prompts.index"));
        assert!(config.metadata_path().ends_with("db/metadata.jsonl"));
    }
}
