//! 에러 타입 정의
//!
//! 코어 파이프라인의 에러 분류입니다. CLI 계층은 anyhow로 감싸서
//! 사용자에게 표시합니다.

use thiserror::Error;

/// 코어 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 네트워크 전송 실패 (연결/타임아웃)
    #[error("transport error: {0}")]
    Transport(String),

    /// 서비스 응답을 파싱할 수 없음
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// 인덱스 아티팩트 불일치 (벡터/메타데이터 개수, 차원, 임베딩 모델)
    #[error("index schema mismatch: {0}")]
    SchemaMismatch(String),

    /// 빈 데이터셋으로 인덱스 빌드 시도
    #[error("cannot build an index from an empty dataset")]
    EmptyDataset,

    /// 인덱스가 로드되지 않음
    #[error("no index loaded")]
    IndexUnavailable,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// reqwest 에러를 전송 에러로 변환
    pub fn transport(err: reqwest::Error) -> Self {
        RagError::Transport(err.to_string())
    }
}
