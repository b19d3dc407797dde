//! RAG 모듈 - 검색 결과와 사용자 의도를 결합한 프롬프트 생성
//!
//! 사용자 아이디어를 임베딩해 인덱스에서 유사 레코드를 찾고, 이를
//! few-shot 참고 자료로 제시하여 최종 영어 프롬프트 한 건을
//! 생성합니다.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::index::{SearchHit, VectorIndex};
use crate::ollama::TextGenerator;

/// 생성 호출 온도
const GENERATE_TEMPERATURE: f32 = 0.7;
/// 참고 자료당 나열하는 요소/기술 파라미터 최대 개수
const MAX_CONTEXT_ITEMS: usize = 3;

/// 최종 프롬프트 생성 시스템 지시
const GENERATE_SYSTEM_PROMPT: &str = "\
You are a professional AI image prompt engineer. Using the user's idea \
and the reference materials, write one high-quality English prompt that \
can be pasted directly into an image-generation tool.

Requirements:
1. The prompt must be in English.
2. It must read coherently and cover subject, style, visual elements, \
mood, and technical parameters.
3. Output the prompt text only. No explanations, no surrounding quotes.";

// ============================================================================
// Types
// ============================================================================

/// 생성 결과
///
/// 호출자가 소유하는 일회성 값이며 저장되지 않습니다.
#[derive(Debug, Clone)]
pub struct GeneratedPrompt {
    /// 최종 프롬프트 텍스트
    pub text: String,
    /// 참고한 레코드의 인덱스 내 순서 위치
    pub source_ordinals: Vec<usize>,
}

// ============================================================================
// PromptGenerator
// ============================================================================

/// RAG 프롬프트 생성기
pub struct PromptGenerator {
    client: Arc<dyn TextGenerator>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Option<VectorIndex>,
}

impl PromptGenerator {
    pub fn new(client: Arc<dyn TextGenerator>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            client,
            embedder,
            index: None,
        }
    }

    /// 인덱스 연결
    ///
    /// 인덱스를 빌드한 임베딩 공간과 현재 임베더가 일치하는지
    /// 확인합니다. 불일치는 검색 품질을 조용히 망가뜨리므로
    /// 에러로 거부합니다.
    pub fn attach_index(&mut self, index: VectorIndex) -> Result<(), RagError> {
        index.ensure_fingerprint(self.embedder.as_ref())?;
        self.index = Some(index);
        Ok(())
    }

    /// 연결된 인덱스 참조
    pub fn index(&self) -> Option<&VectorIndex> {
        self.index.as_ref()
    }

    /// 검색만 수행 (디버깅/조회용)
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, RagError> {
        let index = self.index.as_ref().ok_or(RagError::IndexUnavailable)?;
        let query_vector = self.embedder.embed(query).await?;
        Ok(index.search(&query_vector, limit))
    }

    /// 사용자 아이디어로 최종 프롬프트 생성
    ///
    /// 전송/응답 에러는 대체 결과 없이 그대로 반환합니다.
    pub async fn generate(
        &self,
        user_idea: &str,
        top_k: usize,
    ) -> Result<GeneratedPrompt, RagError> {
        let index = self.index.as_ref().ok_or(RagError::IndexUnavailable)?;

        // 1. 검색
        let query_vector = self.embedder.embed(user_idea).await?;
        let hits = index.search(&query_vector, top_k);
        tracing::debug!("Retrieved {} references for generation", hits.len());

        // 2. 컨텍스트 조립
        let context = build_context(user_idea, &hits);
        let prompt = format!(
            "{}\n\nUsing the references above, write one high-quality English \
             image-generation prompt for the user's idea:",
            context
        );

        // 3. 생성
        let text = self
            .client
            .generate(&prompt, Some(GENERATE_SYSTEM_PROMPT), GENERATE_TEMPERATURE)
            .await?;

        Ok(GeneratedPrompt {
            text: text.trim().to_string(),
            source_ordinals: hits.iter().map(|h| h.ordinal).collect(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// few-shot 컨텍스트 조립
///
/// 참고 자료당 핵심 정보만 남겨 토큰 수를 줄입니다.
fn build_context(user_idea: &str, hits: &[SearchHit]) -> String {
    let mut lines = vec![
        format!("User idea: {}", user_idea),
        String::new(),
        format!("References ({}):", hits.len()),
    ];

    for (i, hit) in hits.iter().enumerate() {
        let record = &hit.record;
        let mut parts = Vec::new();

        if !record.subject.is_empty() {
            parts.push(format!("Subject: {}", record.subject));
        }
        if !record.art_style.is_empty() {
            parts.push(format!("Style: {}", record.art_style));
        }
        if !record.visual_elements.is_empty() {
            let elements: Vec<&str> = record
                .visual_elements
                .iter()
                .take(MAX_CONTEXT_ITEMS)
                .map(String::as_str)
                .collect();
            parts.push(format!("Elements: {}", elements.join(", ")));
        }
        if !record.mood.is_empty() {
            parts.push(format!("Mood: {}", record.mood));
        }
        if !record.technical.is_empty() {
            let technical: Vec<&str> = record
                .technical
                .iter()
                .take(MAX_CONTEXT_ITEMS)
                .map(String::as_str)
                .collect();
            parts.push(format!("Technical: {}", technical.join(", ")));
        }

        if !parts.is_empty() {
            lines.push(format!("{}. {}", i + 1, parts.join("; ")));
        }
    }

    lines.join("\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::etl::{Extractor, PromptStore, RawRecord, StructuredRecord};

    /// 토큰 단위 결정적 임베딩 (테스트용)
    struct MockEmbedding {
        dimension: usize,
        model: &'static str,
    }

    impl MockEmbedding {
        fn new() -> Self {
            Self {
                dimension: 64,
                model: "mock",
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
            let mut vector = vec![0.0f32; self.dimension];
            for token in text.to_lowercase().split_whitespace() {
                let bucket: usize =
                    token.bytes().map(|b| b as usize).sum::<usize>() % self.dimension;
                vector[bucket] += 1.0;
            }
            Ok(vector)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn fingerprint(&self) -> String {
            format!("{}/{}", self.model, self.dimension)
        }
    }

    /// 추출과 생성을 모두 흉내내는 가짜 LLM
    ///
    /// 추출 요청에는 스크립트된 JSON을, 생성 요청에는 고정된 영어
    /// 프롬프트를 돌려주고 마지막 생성 프롬프트를 기록합니다.
    struct FakeLlm {
        extractions: Vec<(&'static str, &'static str)>,
        final_prompt: &'static str,
        last_generation_prompt: Mutex<Option<String>>,
    }

    #[async_trait]
    impl TextGenerator for FakeLlm {
        async fn generate(
            &self,
            prompt: &str,
            _system: Option<&str>,
            _temperature: f32,
        ) -> Result<String, RagError> {
            if prompt.starts_with("Parse this prompt:") {
                for (key, json) in &self.extractions {
                    if prompt.contains(key) {
                        return Ok(json.to_string());
                    }
                }
                return Ok("garbage".to_string());
            }

            *self.last_generation_prompt.lock().unwrap() = Some(prompt.to_string());
            Ok(self.final_prompt.to_string())
        }
    }

    fn sample_record(subject: &str) -> StructuredRecord {
        StructuredRecord {
            subject: subject.to_string(),
            art_style: "Cyberpunk".to_string(),
            visual_elements: vec!["Neon lights".to_string(), "Rain".to_string()],
            mood: "Gloomy".to_string(),
            technical: vec!["8k".to_string(), "Masterpiece".to_string()],
            raw: subject.to_string(),
        }
    }

    fn generator_without_index() -> PromptGenerator {
        let client = Arc::new(FakeLlm {
            extractions: vec![],
            final_prompt: "unused",
            last_generation_prompt: Mutex::new(None),
        });
        PromptGenerator::new(client, Arc::new(MockEmbedding::new()))
    }

    #[tokio::test]
    async fn test_generate_without_index_fails() {
        let generator = generator_without_index();
        let result = generator.generate("a cat", 5).await;
        assert!(matches!(result, Err(RagError::IndexUnavailable)));

        let result = generator.search("a cat", 5).await;
        assert!(matches!(result, Err(RagError::IndexUnavailable)));
    }

    #[tokio::test]
    async fn test_attach_index_rejects_fingerprint_mismatch() {
        // 다른 모델 이름으로 빌드된 인덱스
        let other = MockEmbedding {
            dimension: 64,
            model: "other-model",
        };
        let index = VectorIndex::build(vec![sample_record("cat")], &other)
            .await
            .unwrap();

        let mut generator = generator_without_index();
        let result = generator.attach_index(index);
        assert!(matches!(result, Err(RagError::SchemaMismatch(_))));
        assert!(generator.index().is_none());
    }

    #[test]
    fn test_build_context_layout() {
        let hit = SearchHit {
            ordinal: 0,
            score: 0.9,
            record: StructuredRecord {
                subject: "A cat".to_string(),
                art_style: "Cyberpunk".to_string(),
                visual_elements: vec![
                    "Neon".to_string(),
                    "Rain".to_string(),
                    "Street".to_string(),
                    "Fourth element".to_string(),
                ],
                mood: "Gloomy".to_string(),
                technical: vec!["8k".to_string()],
                raw: "raw".to_string(),
            },
        };

        let context = build_context("rainy cat", &[hit]);
        assert!(context.contains("User idea: rainy cat"));
        assert!(context.contains("References (1):"));
        assert!(context.contains("1. Subject: A cat; Style: Cyberpunk"));
        assert!(context.contains("Elements: Neon, Rain, Street"));
        // 요소는 3개까지만
        assert!(!context.contains("Fourth element"));
    }

    #[tokio::test]
    async fn test_end_to_end_pipeline() {
        // 원문 -> 추출 -> 인덱스 -> 검색 -> 생성
        let raw_cat = "A cyberpunk cat in rainy night, neon lights, 8k masterpiece";
        let cat_json = r#"{"subject": "A cyberpunk cat in rainy night",
            "art_style": "Cyberpunk",
            "visual_elements": ["Neon lights", "Rain", "Cat", "City street"],
            "mood": "Gloomy", "technical": ["8k", "Masterpiece"]}"#;
        let meadow_json = r#"{"subject": "A sunny meadow with flowers",
            "art_style": "Watercolor",
            "visual_elements": ["Grass", "Flowers", "Sunshine"],
            "mood": "Peaceful", "technical": ["4k"]}"#;

        let client = Arc::new(FakeLlm {
            extractions: vec![("cyberpunk cat", cat_json), ("sunny meadow", meadow_json)],
            final_prompt:
                "A cyberpunk cat wandering a rainy neon-lit street at night, gloomy \
                 atmosphere, 8k, masterpiece",
            last_generation_prompt: Mutex::new(None),
        });
        let embedder = Arc::new(MockEmbedding::new());

        // 추출
        let dir = TempDir::new().unwrap();
        let store = PromptStore::open(
            &dir.path().join("structured.jsonl"),
            &dir.path().join("failed.jsonl"),
        )
        .unwrap();
        let extractor = Extractor::new(Arc::clone(&client) as Arc<dyn TextGenerator>, store);
        let rows = vec![
            RawRecord {
                row_index: 0,
                raw_text: raw_cat.to_string(),
            },
            RawRecord {
                row_index: 1,
                raw_text: "A sunny meadow with flowers, watercolor".to_string(),
            },
        ];
        let report = extractor.run(&rows).await.unwrap();
        assert_eq!(report.succeeded, 2);

        let records = extractor.store().load().unwrap();
        assert_eq!(records[0].subject, "A cyberpunk cat in rainy night");
        assert_eq!(records[0].art_style, "Cyberpunk");
        assert_eq!(records[0].mood, "Gloomy");
        assert!(records[0].technical.contains(&"8k".to_string()));
        assert!(records[0].technical.contains(&"Masterpiece".to_string()));
        assert_eq!(records[0].raw, raw_cat);

        // 인덱스 + 검색
        let index = VectorIndex::build(records, embedder.as_ref()).await.unwrap();
        let mut generator =
            PromptGenerator::new(Arc::clone(&client) as Arc<dyn TextGenerator>, embedder);
        generator.attach_index(index).unwrap();

        let hits = generator.search("cyberpunk cat neon rain night", 2).await.unwrap();
        assert_eq!(hits[0].ordinal, 0);

        // 생성
        let prompt = generator
            .generate("cyberpunk cat neon rain night", 2)
            .await
            .unwrap();
        assert!(prompt.text.contains("cat"));
        assert!(prompt.text.contains("rain"));
        assert!(prompt.text.contains("neon"));
        assert_eq!(prompt.source_ordinals[0], 0);

        // 생성 프롬프트에 참고 자료가 포함되었는지 확인
        let sent = client.last_generation_prompt.lock().unwrap().clone().unwrap();
        assert!(sent.contains("User idea: cyberpunk cat neon rain night"));
        assert!(sent.contains("A cyberpunk cat in rainy night"));
    }
}
