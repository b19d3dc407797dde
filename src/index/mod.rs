//! 인덱스 모듈 - 구조화 레코드의 코사인 유사도 인덱스
//!
//! 벡터 목록과 레코드 목록을 같은 순서로 보관하는 평면(flat)
//! 인덱스입니다. i번째 벡터는 i번째 레코드에 대응하며, 이 순서
//! 대응이 유일한 연결 고리입니다. 빌드/로드 이후에는 불변입니다.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::etl::StructuredRecord;

// ============================================================================
// Types
// ============================================================================

/// 인덱스 아티팩트 경로 쌍
///
/// 바이너리 벡터 파일과 JSONL 메타데이터 파일은 항상 함께
/// 읽고 씁니다.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    pub fn new(vectors: impl Into<PathBuf>, metadata: impl Into<PathBuf>) -> Self {
        Self {
            vectors: vectors.into(),
            metadata: metadata.into(),
        }
    }

    /// 설정의 기본 경로
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.index_path(), config.metadata_path())
    }

    /// 두 아티팩트가 모두 존재하는지 확인
    pub fn exist(&self) -> bool {
        self.vectors.exists() && self.metadata.exists()
    }
}

/// 검색 결과 항목
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// 인덱스 내 순서 위치
    pub ordinal: usize,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub score: f32,
    pub record: StructuredRecord,
}

/// 벡터 아티팩트의 직렬화 형식
#[derive(Debug, Serialize, Deserialize)]
struct VectorArtifact {
    fingerprint: String,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 평면 벡터 인덱스
pub struct VectorIndex {
    fingerprint: String,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    records: Vec<StructuredRecord>,
}

impl VectorIndex {
    /// 전체 레코드 스냅샷으로 인덱스 빌드
    ///
    /// 레코드 순서대로 검색 텍스트를 임베딩합니다. 빈 입력은
    /// EmptyDataset 에러입니다.
    pub async fn build(
        records: Vec<StructuredRecord>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self, RagError> {
        if records.is_empty() {
            return Err(RagError::EmptyDataset);
        }

        tracing::info!("Building index over {} records", records.len());

        let texts: Vec<String> = records.iter().map(StructuredRecord::search_text).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        let dimension = embedder.dimension();
        for (i, vector) in vectors.iter().enumerate() {
            if vector.len() != dimension {
                return Err(RagError::SchemaMismatch(format!(
                    "vector {} has dimension {} (expected {})",
                    i,
                    vector.len(),
                    dimension
                )));
            }
        }

        Ok(Self {
            fingerprint: embedder.fingerprint(),
            dimension,
            vectors,
            records,
        })
    }

    /// 인덱스 크기
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 벡터 차원
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 빌드에 사용된 임베딩 공간 식별자
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// 임베더와 인덱스의 임베딩 공간 일치 검사
    ///
    /// 이 인덱스를 질의에 사용하기 전에 반드시 통과해야 합니다.
    /// 불일치는 에러 없이 검색 품질만 망가뜨리기 때문입니다.
    pub fn ensure_fingerprint(&self, embedder: &dyn EmbeddingProvider) -> Result<(), RagError> {
        let current = embedder.fingerprint();
        if self.fingerprint != current {
            return Err(RagError::SchemaMismatch(format!(
                "index was built with embedding '{}' but current embedder is '{}'",
                self.fingerprint, current
            )));
        }
        Ok(())
    }

    /// 순서 위치로 레코드 조회
    pub fn record(&self, ordinal: usize) -> Option<&StructuredRecord> {
        self.records.get(ordinal)
    }

    /// 최근접 이웃 검색
    ///
    /// 유사도 내림차순, 동점은 순서 위치 오름차순으로 정렬하며
    /// 결과 길이는 min(k, 인덱스 크기)입니다.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(ordinal, score)| SearchHit {
                ordinal,
                score,
                record: self.records[ordinal].clone(),
            })
            .collect()
    }

    /// 아티팩트 저장
    ///
    /// 임시 파일에 전체를 쓴 뒤 rename 하므로 읽는 쪽이 부분
    /// 상태를 보는 일은 없습니다. 재빌드는 두 아티팩트를 함께
    /// 교체합니다.
    pub fn save(&self, paths: &IndexPaths) -> Result<(), RagError> {
        for path in [&paths.vectors, &paths.metadata] {
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let vectors_tmp = paths.vectors.with_extension("tmp");
        let metadata_tmp = paths.metadata.with_extension("tmp");

        // 벡터 아티팩트 (bincode)
        let artifact = VectorArtifact {
            fingerprint: self.fingerprint.clone(),
            dimension: self.dimension,
            vectors: self.vectors.clone(),
        };
        let mut writer = BufWriter::new(File::create(&vectors_tmp)?);
        bincode::serde::encode_into_std_write(&artifact, &mut writer, bincode::config::standard())
            .map_err(|e| RagError::Io(std::io::Error::other(e)))?;
        writer.flush()?;

        // 메타데이터 (JSONL, 벡터와 같은 순서)
        let mut writer = BufWriter::new(File::create(&metadata_tmp)?);
        for record in &self.records {
            let line = serde_json::to_string(record)?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;

        std::fs::rename(&vectors_tmp, &paths.vectors)?;
        std::fs::rename(&metadata_tmp, &paths.metadata)?;

        tracing::info!(
            "Saved index ({} records) to {:?}",
            self.records.len(),
            paths.vectors
        );
        Ok(())
    }

    /// 아티팩트 로드
    ///
    /// 두 아티팩트의 레코드 수가 다르거나 차원이 일치하지 않으면
    /// SchemaMismatch로 거부합니다.
    pub fn load(paths: &IndexPaths) -> Result<Self, RagError> {
        let mut reader = BufReader::new(File::open(&paths.vectors)?);
        let artifact: VectorArtifact =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| {
                    RagError::SchemaMismatch(format!("unreadable vector artifact: {}", e))
                })?;

        let reader = BufReader::new(File::open(&paths.metadata)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }

        if artifact.vectors.len() != records.len() {
            return Err(RagError::SchemaMismatch(format!(
                "vector count {} does not match metadata count {}",
                artifact.vectors.len(),
                records.len()
            )));
        }

        for (i, vector) in artifact.vectors.iter().enumerate() {
            if vector.len() != artifact.dimension {
                return Err(RagError::SchemaMismatch(format!(
                    "vector {} has dimension {} (expected {})",
                    i,
                    vector.len(),
                    artifact.dimension
                )));
            }
        }

        tracing::info!(
            "Loaded index ({} records, fingerprint {})",
            records.len(),
            artifact.fingerprint
        );

        Ok(Self {
            fingerprint: artifact.fingerprint,
            dimension: artifact.dimension,
            vectors: artifact.vectors,
            records,
        })
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터이면 0.0을
/// 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
