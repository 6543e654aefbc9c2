//! 에러 타입 정의

use thiserror::Error;

use crate::slp::SlpParseError;

/// MSNP2P 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("청크 파싱 실패: {reason}")]
    ChunkParse { reason: String },

    #[error("SLP 파싱 실패: {0}")]
    Slp(#[from] SlpParseError),

    #[error("유효하지 않은 에코 응답: {reason}")]
    EchoReply { reason: String },

    #[error("Nonce 불일치: expected {expected}, got {got}")]
    NonceMismatch { expected: String, got: String },

    #[error("타임아웃: {what}")]
    Timeout { what: &'static str },

    #[error("캐리어 전송 실패: {0}")]
    Carrier(String),

    #[error("닫힌 전송: transport_id={id}")]
    TransportClosed { id: u64 },

    #[error("이미 등록된 전송: transport_id={id}")]
    AlreadyRegistered { id: u64 },
}

impl Error {
    pub(crate) fn chunk_parse(reason: impl Into<String>) -> Self {
        Error::ChunkParse {
            reason: reason.into(),
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
