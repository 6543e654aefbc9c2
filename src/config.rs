//! 전송 계층 설정

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_DIRECT_PORT;

/// 수신 블롭 최대 선언 크기 기본값 (256 MiB)
pub const DEFAULT_MAX_BLOB_SIZE: u64 = 256 * 1024 * 1024;

/// MSNP2P 전송 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 송신 큐 드레인 주기 (밀리초)
    pub drain_interval_ms: u64,

    /// 릴레이 전송 최대 청크 페이로드 (바이트)
    pub relay_max_chunk_size: usize,

    /// 직접 연결 최대 청크 페이로드 (바이트)
    pub direct_max_chunk_size: usize,

    /// 알림 채널 최대 청크 페이로드 (바이트)
    pub notification_max_chunk_size: usize,

    /// 수신 블롭이 선언할 수 있는 최대 크기 (바이트, 초과 시 버림)
    pub max_blob_size: u64,

    /// 직접 연결 사용 여부
    pub direct_enabled: bool,

    /// 직접 연결 리슨 시작 포트
    pub direct_port: u16,

    /// 리슨 포트 바인드 재시도 횟수 (실패 시 포트 +1)
    pub direct_listen_attempts: u16,

    /// 직접 연결 타임아웃 (밀리초)
    pub direct_connect_timeout_ms: u64,

    /// NAT 에코 서버 주소
    pub echo_server: SocketAddr,

    /// 에코 응답 대기 타임아웃 (밀리초)
    pub echo_timeout_ms: u64,

    /// 외부 주소 확인 후 펀칭 시작까지 지연 (밀리초)
    pub punch_delay_ms: u64,

    /// 펀칭 listen/connect 대기 타임아웃 (밀리초)
    pub punch_timeout_ms: u64,

    /// 이벤트 채널 용량 (0이면 무제한)
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drain_interval_ms: 200,
            relay_max_chunk_size: 1250,
            direct_max_chunk_size: 1350,
            notification_max_chunk_size: 1250,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            direct_enabled: true,
            direct_port: DEFAULT_DIRECT_PORT,
            direct_listen_attempts: 10,
            direct_connect_timeout_ms: 5000,
            echo_server: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(64, 4, 35, 253), 7001)),
            echo_timeout_ms: 5000,
            punch_delay_ms: 1000,
            punch_timeout_ms: 5000,
            event_channel_capacity: 0,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 같은 LAN 안의 피어용 설정
    pub fn lan() -> Self {
        Self {
            drain_interval_ms: 20,
            direct_connect_timeout_ms: 1000,
            echo_timeout_ms: 1000,
            punch_delay_ms: 0,
            punch_timeout_ms: 1000,
            ..Self::default()
        }
    }

    /// 릴레이만 사용 (직접 연결/NAT 탐지 비활성)
    pub fn relay_only() -> Self {
        Self {
            direct_enabled: false,
            ..Self::default()
        }
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn direct_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.direct_connect_timeout_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn punch_delay(&self) -> Duration {
        Duration::from_millis(self.punch_delay_ms)
    }

    pub fn punch_timeout(&self) -> Duration {
        Duration::from_millis(self.punch_timeout_ms)
    }
}
