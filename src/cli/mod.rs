//! CLI 모듈
//!
//! prompt-rag CLI 명령어 정의 및 구현. 설정은 여기서 한 번 로드해
//! 각 컴포넌트에 전달합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::embedding::{EmbeddingProvider, OllamaEmbedding};
use crate::etl::{Extractor, PromptStore, RawRecord};
use crate::index::{IndexPaths, VectorIndex};
use crate::ollama::{OllamaClient, TextGenerator};
use crate::rag::PromptGenerator;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "prompt-rag")]
#[command(version, about = "AI 그림 프롬프트 RAG 생성기", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 원본 프롬프트 파일을 구조화 레코드로 추출
    Extract {
        /// 입력 파일 (CSV 또는 JSONL)
        #[arg(short, long)]
        file: PathBuf,

        /// CSV에서 읽을 열 번호 (0-based)
        #[arg(short, long, default_value = "0")]
        column: usize,
    },

    /// 구조화 레코드 전체로 벡터 인덱스 재빌드
    BuildIndex,

    /// 아이디어로 최종 프롬프트 생성
    Generate {
        /// 창작 아이디어
        idea: String,

        /// 검색할 참고 자료 개수 (기본: 설정값)
        #[arg(short, long)]
        top_k: Option<usize>,
    },

    /// 인덱스 검색 (조회 전용)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env();

    match cli.command {
        Commands::Extract { file, column } => cmd_extract(&config, &file, column).await,
        Commands::BuildIndex => cmd_build_index(&config).await,
        Commands::Generate { idea, top_k } => cmd_generate(&config, &idea, top_k).await,
        Commands::Search { query, limit } => cmd_search(&config, &query, limit).await,
        Commands::Status => cmd_status(&config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 추출 명령어 (extract)
async fn cmd_extract(config: &AppConfig, file: &Path, column: usize) -> Result<()> {
    let client = OllamaClient::from_config(config).context("Ollama 클라이언트 생성 실패")?;

    // 사전 점검
    println!("[*] Ollama 연결 확인 중: {}", config.ollama_host);
    if !client.ping().await {
        bail!(
            "Ollama 서비스에 연결할 수 없습니다.\n\n\
             확인 사항:\n  \
             1. Ollama가 실행 중인지\n  \
             2. OLLAMA_HOST 설정이 올바른지 (현재: {})",
            config.ollama_host
        );
    }
    println!("[OK] 연결 확인 (모델: {})", config.ollama_model);

    // 원본 행 로드
    let rows = load_raw_rows(file, column)
        .with_context(|| format!("입력 파일 로드 실패: {:?}", file))?;
    if rows.is_empty() {
        println!("[!] 입력 파일에 처리할 행이 없습니다.");
        return Ok(());
    }
    println!("[*] {} 행 로드됨, 추출 시작...", rows.len());

    // 추출 실행
    let store = PromptStore::from_config(config).context("저장소 열기 실패")?;
    let extractor = Extractor::new(Arc::new(client), store);
    let report = extractor.run(&rows).await.context("추출 실행 실패")?;

    println!();
    println!("[OK] 추출 완료");
    println!("     성공: {} 건", report.succeeded);
    println!("     실패: {} 건", report.failed);
    println!("     건너뜀(기존): {} 건", report.skipped);
    println!("     저장 위치: {:?}", config.structured_path());

    if report.succeeded > 0 {
        println!();
        println!("다음 단계: prompt-rag build-index");
    }

    Ok(())
}

/// 인덱스 재빌드 명령어 (build-index)
async fn cmd_build_index(config: &AppConfig) -> Result<()> {
    let store = PromptStore::from_config(config).context("저장소 열기 실패")?;
    let records = store.load().context("구조화 레코드 로드 실패")?;

    if records.is_empty() {
        bail!(
            "구조화 레코드가 없습니다. 먼저 extract를 실행하세요.\n  \
             저장 경로: {:?}",
            config.structured_path()
        );
    }

    println!("[*] {} 레코드로 인덱스 빌드 중...", records.len());
    println!("    임베딩 모델: {} (차원 {})", config.embedding_model, config.vector_dim);

    let embedder = OllamaEmbedding::from_config(config).context("임베딩 클라이언트 생성 실패")?;
    let index = VectorIndex::build(records, &embedder)
        .await
        .context("인덱스 빌드 실패")?;

    let paths = IndexPaths::from_config(config);
    index.save(&paths).context("인덱스 저장 실패")?;

    println!("[OK] 인덱스 저장 완료 ({} 건)", index.len());
    println!("     벡터: {:?}", paths.vectors);
    println!("     메타데이터: {:?}", paths.metadata);

    Ok(())
}

/// 프롬프트 생성 명령어 (generate)
async fn cmd_generate(config: &AppConfig, idea: &str, top_k: Option<usize>) -> Result<()> {
    let top_k = top_k.unwrap_or(config.top_k);
    let generator = build_generator(config)?;

    println!("[*] 검색 및 생성 중... (top_k = {})", top_k);
    let result = generator
        .generate(idea, top_k)
        .await
        .context("프롬프트 생성 실패")?;

    println!();
    println!("===== 생성된 프롬프트 =====");
    println!("{}", result.text);
    println!("===========================");
    println!();

    if let Some(index) = generator.index() {
        println!("참고 자료 {} 건:", result.source_ordinals.len());
        for (i, ordinal) in result.source_ordinals.iter().enumerate() {
            if let Some(record) = index.record(*ordinal) {
                println!("  {}. [{}] {}", i + 1, record.art_style, record.subject);
            }
        }
    }

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(config: &AppConfig, query: &str, limit: usize) -> Result<()> {
    let paths = IndexPaths::from_config(config);
    if !paths.exist() {
        bail!("인덱스가 없습니다. 먼저 build-index를 실행하세요.");
    }

    let index = VectorIndex::load(&paths).context("인덱스 로드 실패")?;
    let embedder = OllamaEmbedding::from_config(config).context("임베딩 클라이언트 생성 실패")?;
    index
        .ensure_fingerprint(&embedder)
        .context("인덱스와 임베딩 모델이 일치하지 않습니다. build-index를 다시 실행하세요")?;
    let query_vector = embedder.embed(query).await.context("쿼리 임베딩 실패")?;

    let hits = index.search(&query_vector, limit);
    println!("[*] \"{}\" 검색 결과 {} 건:", query, hits.len());
    println!();

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. 유사도: {:.4}", i + 1, hit.score);
        println!("   주제: {}", hit.record.subject);
        println!("   스타일: {}", hit.record.art_style);
        println!("   요소: {}", hit.record.visual_elements.join(", "));
        println!("   분위기: {}", hit.record.mood);
        println!();
    }

    Ok(())
}

/// 상태 확인 명령어 (status)
async fn cmd_status(config: &AppConfig) -> Result<()> {
    println!("===== prompt-rag 상태 =====");

    // Ollama 연결
    let client = OllamaClient::from_config(config).context("Ollama 클라이언트 생성 실패")?;
    if client.ping().await {
        println!("[OK] Ollama 연결됨 ({})", config.ollama_host);
        println!("     생성 모델: {}", config.ollama_model);
        println!("     임베딩 모델: {}", config.embedding_model);
    } else {
        println!("[!] Ollama 연결 실패 ({})", config.ollama_host);
    }

    // 저장소
    let store = PromptStore::from_config(config).context("저장소 열기 실패")?;
    let stats = store.stats().context("저장소 통계 조회 실패")?;
    println!("[*] 구조화 레코드: {} 건 (실패 기록 {} 건)", stats.record_count, stats.failed_count);
    println!("    저장 위치: {:?}", stats.path);

    // 인덱스
    let paths = IndexPaths::from_config(config);
    if paths.exist() {
        match VectorIndex::load(&paths) {
            Ok(index) => {
                println!(
                    "[*] 인덱스: {} 건 (차원 {}, fingerprint {})",
                    index.len(),
                    index.dimension(),
                    index.fingerprint()
                );
            }
            Err(e) => println!("[!] 인덱스 로드 실패: {}", e),
        }
    } else {
        println!("[!] 인덱스 없음 (build-index를 실행하세요)");
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 생성기 조립 (인덱스 로드 + fingerprint 검사 포함)
fn build_generator(config: &AppConfig) -> Result<PromptGenerator> {
    let paths = IndexPaths::from_config(config);
    if !paths.exist() {
        bail!("인덱스가 없습니다. 먼저 extract와 build-index를 실행하세요.");
    }

    let index = VectorIndex::load(&paths).context("인덱스 로드 실패")?;
    let client = OllamaClient::from_config(config).context("Ollama 클라이언트 생성 실패")?;
    let embedder = OllamaEmbedding::from_config(config).context("임베딩 클라이언트 생성 실패")?;

    let mut generator = PromptGenerator::new(
        Arc::new(client) as Arc<dyn TextGenerator>,
        Arc::new(embedder) as Arc<dyn EmbeddingProvider>,
    );
    generator
        .attach_index(index)
        .context("인덱스와 임베딩 모델이 일치하지 않습니다. build-index를 다시 실행하세요")?;

    Ok(generator)
}

/// 원본 행 로드 (CSV 또는 JSONL)
///
/// 행 순서가 처리 순서이며 재개 시 식별 기준입니다.
fn load_raw_rows(file: &Path, column: usize) -> Result<Vec<RawRecord>> {
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let texts = match extension.as_str() {
        "csv" => load_csv(file, column)?,
        "jsonl" => load_jsonl(file)?,
        other => bail!("지원하지 않는 입력 형식: .{} (csv, jsonl 지원)", other),
    };

    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(row_index, raw_text)| RawRecord { row_index, raw_text })
        .collect())
}

/// CSV 파일에서 지정 열 로드 (헤더 행 제외)
fn load_csv(file: &Path, column: usize) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(file)
        .with_context(|| format!("CSV 열기 실패: {:?}", file))?;

    let mut texts = Vec::new();
    for result in reader.records() {
        let record = result.context("CSV 행 파싱 실패")?;
        if let Some(value) = record.get(column) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                texts.push(trimmed.to_string());
            }
        }
    }

    Ok(texts)
}

/// JSONL 파일 로드 (행 형식: {"prompt": "..."})
fn load_jsonl(file: &Path) -> Result<Vec<String>> {
    use std::io::BufRead;

    let reader = std::io::BufReader::new(
        std::fs::File::open(file).with_context(|| format!("JSONL 열기 실패: {:?}", file))?,
    );

    let mut texts = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value =
            serde_json::from_str(&line).context("JSONL 행 파싱 실패")?;
        if let Some(prompt) = value.get("prompt").and_then(|p| p.as_str()) {
            let trimmed = prompt.trim();
            if !trimmed.is_empty() {
                texts.push(trimmed.to_string());
            }
        }
    }

    Ok(texts)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_csv_first_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "prompt,author").unwrap();
        writeln!(file, "cyberpunk cat,kim").unwrap();
        writeln!(file, "sunny meadow,lee").unwrap();
        writeln!(file, ",park").unwrap();

        let rows = load_raw_rows(&path, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_index, 0);
        assert_eq!(rows[0].raw_text, "cyberpunk cat");
        assert_eq!(rows[1].raw_text, "sunny meadow");
    }

    #[test]
    fn test_load_csv_other_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "id,prompt").unwrap();
        writeln!(file, "1,neon city").unwrap();

        let rows = load_raw_rows(&path, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].raw_text, "neon city");
    }

    #[test]
    fn test_load_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"file": "a.png", "prompt": "cyberpunk cat"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"file": "b.png", "prompt": "  sunny meadow  "}}"#).unwrap();
        writeln!(file, r#"{{"file": "c.png"}}"#).unwrap();

        let rows = load_raw_rows(&path, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].raw_text, "cyberpunk cat");
        assert_eq!(rows[1].raw_text, "sunny meadow");
        assert_eq!(rows[1].row_index, 1);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = load_raw_rows(Path::new("data.xlsx"), 0);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_search_rejects_embedding_mismatch() {
        use async_trait::async_trait;
        use crate::error::RagError;
        use crate::etl::StructuredRecord;

        // 설정과 다른 임베딩 공간으로 빌드된 인덱스
        struct OtherEmbedding;

        #[async_trait]
        impl EmbeddingProvider for OtherEmbedding {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
                Ok(vec![1.0; 4])
            }

            fn dimension(&self) -> usize {
                4
            }

            fn fingerprint(&self) -> String {
                "other-model/4".to_string()
            }
        }

        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let record = StructuredRecord {
            subject: "A cat".to_string(),
            art_style: "Test".to_string(),
            visual_elements: vec![],
            mood: "Calm".to_string(),
            technical: vec![],
            raw: "a cat".to_string(),
        };
        let index = VectorIndex::build(vec![record], &OtherEmbedding).await.unwrap();
        index.save(&IndexPaths::from_config(&config)).unwrap();

        // 임베딩 호출 전에 fingerprint 검사에서 실패해야 함
        let result = cmd_search(&config, "a cat", 5).await;
        let err = result.unwrap_err();
        assert!(err
            .chain()
            .any(|c| matches!(c.downcast_ref(), Some(RagError::SchemaMismatch(_)))));
    }
}
