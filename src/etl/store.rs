//! Prompt Store - JSONL 기반 추가 전용 저장소
//!
//! 구조화된 프롬프트 레코드를 한 줄에 하나씩 저장합니다. 기록된
//! 레코드는 수정되지 않으며, 레코드 단위로 즉시 flush 하므로
//! 중단 시 손실은 처리 중이던 레코드 하나뿐입니다.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::AppConfig;
use crate::error::RagError;
use crate::etl::{FailedExtraction, StructuredRecord};

// ============================================================================
// Types
// ============================================================================

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub record_count: usize,
    pub failed_count: usize,
    pub path: PathBuf,
}

// ============================================================================
// PromptStore
// ============================================================================

/// 구조화 레코드 저장소
///
/// 성공 레코드와 실패 기록을 각각의 JSONL 파일에 보관합니다.
pub struct PromptStore {
    structured_path: PathBuf,
    failed_path: PathBuf,
}

impl PromptStore {
    /// 저장소 열기 (파일이 없으면 첫 쓰기 시점에 생성)
    pub fn open(structured_path: &Path, failed_path: &Path) -> Result<Self, RagError> {
        for path in [structured_path, failed_path] {
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        Ok(Self {
            structured_path: structured_path.to_path_buf(),
            failed_path: failed_path.to_path_buf(),
        })
    }

    /// 설정의 기본 경로에서 열기
    pub fn from_config(config: &AppConfig) -> Result<Self, RagError> {
        Self::open(&config.structured_path(), &config.failed_path())
    }

    /// 저장 경로 반환
    pub fn path(&self) -> &Path {
        &self.structured_path
    }

    /// 전체 레코드 스냅샷 로드 (인덱스 빌드용)
    ///
    /// 파일이 아직 없으면 빈 목록을 반환합니다. 손상된 줄은
    /// 에러로 표면화합니다.
    pub fn load(&self) -> Result<Vec<StructuredRecord>, RagError> {
        if !self.structured_path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.structured_path)?);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }

        Ok(records)
    }

    /// 저장된 레코드의 raw 텍스트 집합 (재개용 중복 검사)
    pub fn existing_raws(&self) -> Result<HashSet<String>, RagError> {
        Ok(self.load()?.into_iter().map(|r| r.raw).collect())
    }

    /// 저장된 레코드 수
    pub fn count(&self) -> Result<usize, RagError> {
        Ok(self.load()?.len())
    }

    /// 추가 전용 writer 생성
    pub fn appender(&self) -> Result<StoreAppender, RagError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.structured_path)?;

        Ok(StoreAppender { file })
    }

    /// 추출 실패 기록
    pub fn record_failure(&self, failure: &FailedExtraction) -> Result<(), RagError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.failed_path)?;

        let line = serde_json::to_string(failure)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    /// 실패 기록 수
    pub fn failure_count(&self) -> Result<usize, RagError> {
        if !self.failed_path.exists() {
            return Ok(0);
        }

        let reader = BufReader::new(File::open(&self.failed_path)?);
        let mut count = 0;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats, RagError> {
        Ok(StoreStats {
            record_count: self.count()?,
            failed_count: self.failure_count()?,
            path: self.structured_path.clone(),
        })
    }
}

// ============================================================================
// StoreAppender
// ============================================================================

/// 레코드 단위 append writer
///
/// 레코드마다 한 줄을 쓰고 즉시 flush 합니다.
pub struct StoreAppender {
    file: File,
}

impl StoreAppender {
    /// 레코드 한 건 추가
    pub fn append(&mut self, record: &StructuredRecord) -> Result<(), RagError> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
