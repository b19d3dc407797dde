//! prompt-rag - AI 그림 프롬프트 RAG 생성기
//!
//! 짧은 창작 아이디어를, 과거에 구조화해 둔 프롬프트 예시를
//! 검색해 근거로 삼아, 바로 사용할 수 있는 이미지 생성 프롬프트로
//! 바꿔주는 파이프라인입니다.
//!
//! - ETL: 원본 텍스트 행 -> LLM 추출 -> 구조화 레코드 (JSONL)
//! - Index: 구조화 레코드 -> 임베딩 -> 코사인 유사도 인덱스
//! - RAG: 아이디어 -> 검색 -> few-shot 생성 -> 최종 프롬프트

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod etl;
pub mod index;
pub mod ollama;
pub mod rag;

// Re-exports
pub use config::AppConfig;
pub use embedding::{EmbeddingProvider, OllamaEmbedding};
pub use error::RagError;
pub use etl::{
    ExtractionReport, Extractor, FailedExtraction, PromptStore, RawRecord, StoreStats,
    StructuredRecord,
};
pub use index::{cosine_similarity, IndexPaths, SearchHit, VectorIndex};
pub use ollama::{OllamaClient, RetryPolicy, TextGenerator};
pub use rag::{GeneratedPrompt, PromptGenerator};
