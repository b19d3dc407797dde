//! ETL 모듈 - 원본 프롬프트의 구조화 추출
//!
//! 원본 텍스트 행을 LLM으로 파싱하여 구조화 레코드로 변환합니다.
//! 행 단위로 순차 처리하며, 성공 즉시 저장소에 추가하고 실패는
//! 기록 후 계속 진행합니다. 이미 저장된 행은 건너뛰므로 중단 후
//! 재실행해도 중복이 생기지 않습니다.

mod store;

pub use store::{PromptStore, StoreAppender, StoreStats};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::ollama::TextGenerator;

/// 스키마 파싱 실패 시 재시도 횟수
const SCHEMA_RETRIES: u32 = 2;
/// 추출 호출 온도 (낮게 유지해 출력 안정화)
const EXTRACT_TEMPERATURE: f32 = 0.3;

/// 구조화 추출 시스템 프롬프트
const EXTRACT_SYSTEM_PROMPT: &str = "\
You are a senior art director and prompt engineer. Parse the raw \
image-generation prompt provided by the user into a structured JSON object.

Requirements:
1. Return pure JSON only. No explanations, no markdown code fences.
2. The JSON object must contain exactly these fields:
   - subject: the core subject of the image (string, English)
   - art_style: the art style (string, English, e.g. \"Cyberpunk\", \"Oil painting\")
   - visual_elements: list of visual elements (array of strings, English)
   - mood: the mood or atmosphere (string, English, e.g. \"Gloomy\", \"Vibrant\")
   - technical: list of technical parameters (array of strings, e.g. \"8k\", \"Masterpiece\")
3. All values must be in English, regardless of the input language.

Example output:
{
  \"subject\": \"A cyberpunk cat in rainy night\",
  \"art_style\": \"Cyberpunk\",
  \"visual_elements\": [\"Neon lights\", \"Rain\", \"Cat\", \"City street\"],
  \"mood\": \"Gloomy\",
  \"technical\": [\"8k\", \"Masterpiece\", \"Highly detailed\"]
}";

/// 재시도 시 덧붙이는 엄격 지시
const STRICT_REMINDER: &str = "\

IMPORTANT: your previous answer was not valid JSON with the required \
fields. Respond with a single JSON object and nothing else. Every field \
listed above is required, with exactly the given names and types.";

// ============================================================================
// Types
// ============================================================================

/// 원본 입력 행
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 입력 파일 내 행 번호 (0-based)
    pub row_index: usize,
    /// 원본 프롬프트 텍스트
    pub raw_text: String,
}

/// 구조화된 프롬프트 레코드
///
/// `raw`는 항상 입력 원문 그대로입니다. 재개 시 중복 판정 키이므로
/// 모델 출력으로 덮어쓰지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub subject: String,
    pub art_style: String,
    pub visual_elements: Vec<String>,
    pub mood: String,
    pub technical: Vec<String>,
    pub raw: String,
}

impl StructuredRecord {
    /// 검색용 정규 텍스트
    ///
    /// subject, visual_elements, mood, technical을 이어 붙입니다.
    /// 전부 비어 있으면 raw로 대체합니다.
    pub fn search_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();

        if !self.subject.is_empty() {
            parts.push(&self.subject);
        }
        parts.extend(self.visual_elements.iter().map(String::as_str));
        if !self.mood.is_empty() {
            parts.push(&self.mood);
        }
        parts.extend(self.technical.iter().map(String::as_str));

        if parts.is_empty() {
            return self.raw.clone();
        }

        parts.join(" ")
    }
}

/// 추출 실패 기록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedExtraction {
    pub raw_text: String,
    pub error_reason: String,
    pub failed_at: DateTime<Utc>,
}

/// 배치 추출 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// LLM 응답의 필수 스키마
///
/// serde가 누락 필드와 타입 불일치를 모두 거부합니다.
#[derive(Debug, Deserialize)]
struct ExtractedFields {
    subject: String,
    art_style: String,
    visual_elements: Vec<String>,
    mood: String,
    technical: Vec<String>,
}

// ============================================================================
// Extractor
// ============================================================================

/// 구조화 추출기
pub struct Extractor {
    client: Arc<dyn TextGenerator>,
    store: PromptStore,
}

impl Extractor {
    pub fn new(client: Arc<dyn TextGenerator>, store: PromptStore) -> Self {
        Self { client, store }
    }

    /// 저장소 접근 (통계 조회용)
    pub fn store(&self) -> &PromptStore {
        &self.store
    }

    /// 배치 추출 실행
    ///
    /// 행 순서대로 처리하며 append 순서도 동일합니다. 레코드 하나의
    /// 실패는 기록만 하고 배치를 중단하지 않습니다.
    pub async fn run(&self, rows: &[RawRecord]) -> Result<ExtractionReport, RagError> {
        let mut seen = self.store.existing_raws()?;
        let mut appender = self.store.appender()?;
        let mut report = ExtractionReport::default();

        for row in rows {
            if seen.contains(&row.raw_text) {
                tracing::debug!(row = row.row_index, "Skipping already-extracted row");
                report.skipped += 1;
                continue;
            }

            match self.parse_one(&row.raw_text).await {
                Ok(record) => {
                    appender.append(&record)?;
                    seen.insert(row.raw_text.clone());
                    report.succeeded += 1;
                }
                Err(e) => {
                    tracing::warn!(row = row.row_index, "Extraction failed: {}", e);
                    self.store.record_failure(&FailedExtraction {
                        raw_text: row.raw_text.clone(),
                        error_reason: e.to_string(),
                        failed_at: Utc::now(),
                    })?;
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Extraction batch finished"
        );
        Ok(report)
    }

    /// 단일 행 추출
    ///
    /// 스키마 불일치는 엄격한 지시로 재시도하고, 전송 에러는 즉시
    /// 반환합니다 (클라이언트가 이미 전송 재시도를 끝낸 상태).
    async fn parse_one(&self, raw_text: &str) -> Result<StructuredRecord, RagError> {
        let user_prompt = format!("Parse this prompt:\n\n{}", raw_text);
        let strict_system = format!("{}{}", EXTRACT_SYSTEM_PROMPT, STRICT_REMINDER);
        let mut last_error =
            RagError::MalformedResponse("extraction not attempted".to_string());

        for attempt in 0..=SCHEMA_RETRIES {
            let system = if attempt == 0 {
                EXTRACT_SYSTEM_PROMPT
            } else {
                strict_system.as_str()
            };

            let response = self
                .client
                .generate(&user_prompt, Some(system), EXTRACT_TEMPERATURE)
                .await?;

            match parse_response(&response, raw_text) {
                Ok(record) => return Ok(record),
                Err(e) => {
                    tracing::debug!(
                        "Schema parse failed (attempt {}/{}): {}",
                        attempt + 1,
                        SCHEMA_RETRIES + 1,
                        e
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// LLM 응답을 구조화 레코드로 파싱
fn parse_response(response: &str, raw_text: &str) -> Result<StructuredRecord, RagError> {
    let cleaned = strip_code_fences(response);

    let fields: ExtractedFields = serde_json::from_str(cleaned).map_err(|e| {
        RagError::MalformedResponse(format!("extraction schema violation: {}", e))
    })?;

    Ok(StructuredRecord {
        subject: fields.subject,
        art_style: fields.art_style,
        visual_elements: fields.visual_elements,
        mood: fields.mood,
        technical: fields.technical,
        raw: raw_text.to_string(),
    })
}

/// 마크다운 코드 펜스 제거
///
/// 모델이 지시를 어기고 ```json ... ``` 으로 감싸는 경우가 있어
/// 파싱 전에 벗겨냅니다.
fn strip_code_fences(response: &str) -> &str {
    let mut text = response.trim();

    if let Some(rest) = text.strip_prefix("```") {
        text = rest;
        // 언어 태그는 대소문자 구분 없이 제거
        if text.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            text = &text[4..];
        }
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }

    text.trim()
}

// ============================================================================
// Tests
// ============================================================================
