//! # MSNP2P
//!
//! 메신저 P2P 바이너리 전송 계층
//!
//! ## 핵심 특징
//! - **청크/블롭 프레이밍**: 임의 크기 페이로드를 전송 단위 청크로 분할, 오프셋 기반 조립
//! - **ACK 규율**: 전송별 청크 ID 카운터, 대기 ACK/블롭 추적
//! - **우선순위 큐**: 제어 큐(ACK, 시그널링)가 항상 데이터 큐보다 먼저 비워짐
//! - **전송 선택**: 릴레이 / 직접 연결 / 알림 채널 / 기본(no-op) 중 첫 매칭 선택
//! - **SLP 시그널링**: 세션/직접연결 협상용 텍스트 메시지
//! - **NAT 탐지**: 에코 서버 왕복으로 외부 주소 확인 후 홀 펀칭

pub mod chunk;
pub mod config;
pub mod direct;
pub mod error;
pub mod manager;
pub mod nat;
pub mod relay;
pub mod slp;
pub mod stats;
pub mod transport;
pub mod wire;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use chunk::{Blob, Chunk, ChunkFlags, ChunkHeader};
pub use config::Config;
pub use error::{Error, Result};
pub use manager::{ChunkDirection, EventReceiver, TransportEvent, TransportManager};
pub use nat::{EchoReply, NatTraversal, PunchOutcome};
pub use slp::{BodyRegistry, SlpBody, SlpMessage, SlpParseError};
pub use stats::TransferStats;
pub use transport::{Carrier, CarrierMessage, Transport, TransportId, TransportKind};
pub use wire::WireVersion;

/// 청크 ID 상한 (2^31 - 1)
pub const MAX_CHUNK_ID: u32 = 2_147_483_647;

/// 랜덤 ID 생성 하한
pub const MIN_GENERATED_ID: u32 = 1000;

/// 릴레이 메시지 Content-Type
pub const P2P_CONTENT_TYPE: &str = "application/x-msnmsgrp2p";

/// 직접 연결 기본 포트
pub const DEFAULT_DIRECT_PORT: u16 = 6891;

/// 세션 ID (0 = 시그널링)
pub type SessionId = u32;

/// `[MIN_GENERATED_ID, MAX_CHUNK_ID)` 범위의 랜덤 ID
pub fn generate_id() -> u32 {
    use rand::Rng;
    rand::thread_rng().gen_range(MIN_GENERATED_ID..MAX_CHUNK_ID)
}

/// 애플리케이션 ID
pub mod application_id {
    pub const NONE: u32 = 0;
    pub const FILE_TRANSFER: u32 = 2;
    pub const WEBCAM: u32 = 4;
    pub const CUSTOM_EMOTICON_TRANSFER: u32 = 11;
    pub const DISPLAY_PICTURE_TRANSFER: u32 = 12;
}

/// 상대 계정 (예: `bob@example.com`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(account: impl Into<String>) -> Self {
        Self(account.into())
    }

    pub fn account(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(account: &str) -> Self {
        Self::new(account)
    }
}

/// 같은 계정에 동시 접속한 클라이언트 인스턴스 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(Uuid);

impl EndpointId {
    pub fn new(guid: Uuid) -> Self {
        Self(guid)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn guid(&self) -> Uuid {
        self.0
    }

    /// `{XXXXXXXX-...}` 형식 파싱 (중괄호 생략 가능)
    pub fn parse(text: &str) -> Option<Self> {
        parse_braced_guid(text).map(Self)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&braced_guid(&self.0))
    }
}

/// `{대문자-GUID}` 표기
pub fn braced_guid(guid: &Uuid) -> String {
    format!("{{{}}}", guid.hyphenated().to_string().to_uppercase())
}

/// 중괄호 유무와 관계없이 GUID 파싱
pub fn parse_braced_guid(text: &str) -> Option<Uuid> {
    let trimmed = text.trim().trim_start_matches('{').trim_end_matches('}');
    Uuid::parse_str(trimmed).ok()
}

/// 로컬 계정 + 로컬 엔드포인트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub account: PeerId,
    pub endpoint: EndpointId,
}

impl LocalEndpoint {
    pub fn new(account: impl Into<String>, endpoint: EndpointId) -> Self {
        Self {
            account: PeerId::new(account),
            endpoint,
        }
    }
}
