//! 전송 통계

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 최근 청크 송신 기록
#[derive(Debug, Clone, Copy)]
struct ChunkRecord {
    timestamp: Instant,
    size: usize,
}

/// 전송별 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신 청크 수 (ACK 포함)
    pub chunks_sent: u64,

    /// 송신 페이로드 바이트
    pub bytes_sent: u64,

    /// 수신 청크 수
    pub chunks_received: u64,

    /// 수신 페이로드 바이트
    pub bytes_received: u64,

    pub acks_sent: u64,
    pub acks_received: u64,
    pub naks_received: u64,

    /// 데이터 준비 프로브, 블랙리스트 등으로 버려진 청크
    pub dropped_chunks: u64,

    /// 큐에서 완전히 내보낸 블롭 수
    pub blobs_sent: u64,

    /// 최근 송신 기록
    recent: VecDeque<ChunkRecord>,

    /// 윈도우 크기
    window_size: usize,
}

impl TransferStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            start_time: Instant::now(),
            chunks_sent: 0,
            bytes_sent: 0,
            chunks_received: 0,
            bytes_received: 0,
            acks_sent: 0,
            acks_received: 0,
            naks_received: 0,
            dropped_chunks: 0,
            blobs_sent: 0,
            recent: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// 청크 송신 기록
    pub fn record_sent(&mut self, size: usize, is_ack: bool) {
        if self.recent.len() >= self.window_size {
            self.recent.pop_front();
        }
        self.recent.push_back(ChunkRecord {
            timestamp: Instant::now(),
            size,
        });

        self.chunks_sent += 1;
        self.bytes_sent += size as u64;
        if is_ack {
            self.acks_sent += 1;
        }
    }

    /// 청크 수신 기록
    pub fn record_received(&mut self, size: usize) {
        self.chunks_received += 1;
        self.bytes_received += size as u64;
    }

    /// ACK/NAK 수신 기록
    pub fn record_acknowledged(&mut self, nak: bool) {
        if nak {
            self.naks_received += 1;
        } else {
            self.acks_received += 1;
        }
    }

    pub fn record_dropped(&mut self) {
        self.dropped_chunks += 1;
    }

    pub fn record_blob_sent(&mut self) {
        self.blobs_sent += 1;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 최근 윈도우 송신 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let (Some(first), Some(last)) = (self.recent.front(), self.recent.back()) else {
            return 0.0;
        };

        let duration = last.timestamp.duration_since(first.timestamp);
        if self.recent.len() < 2 || duration.is_zero() {
            return 0.0;
        }

        let total_size: usize = self.recent.iter().skip(1).map(|r| r.size).sum();
        total_size as f64 / duration.as_secs_f64()
    }

    /// 다른 전송의 카운터를 합산 (윈도우는 합치지 않음)
    pub fn merge(&mut self, other: &TransferStats) {
        self.chunks_sent += other.chunks_sent;
        self.bytes_sent += other.bytes_sent;
        self.chunks_received += other.chunks_received;
        self.bytes_received += other.bytes_received;
        self.acks_sent += other.acks_sent;
        self.acks_received += other.acks_received;
        self.naks_received += other.naks_received;
        self.dropped_chunks += other.dropped_chunks;
        self.blobs_sent += other.blobs_sent;
        if other.start_time < self.start_time {
            self.start_time = other.start_time;
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} chunks / {} bytes | Received: {} chunks / {} bytes | ACKs: {}/{} | NAKs: {} | Dropped: {} | Blobs: {}",
            self.elapsed().as_secs_f64(),
            self.chunks_sent,
            self.bytes_sent,
            self.chunks_received,
            self.bytes_received,
            self.acks_sent,
            self.acks_received,
            self.naks_received,
            self.dropped_chunks,
            self.blobs_sent,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_merge() {
        let mut relay = TransferStats::default();
        relay.record_sent(1250, false);
        relay.record_sent(0, true);
        relay.record_received(500);
        relay.record_acknowledged(false);
        relay.record_acknowledged(true);

        let mut direct = TransferStats::default();
        direct.record_sent(1350, false);
        direct.record_dropped();

        let mut total = TransferStats::default();
        total.merge(&relay);
        total.merge(&direct);

        assert_eq!(total.chunks_sent, 3);
        assert_eq!(total.bytes_sent, 2600);
        assert_eq!(total.acks_sent, 1);
        assert_eq!(total.acks_received, 1);
        assert_eq!(total.naks_received, 1);
        assert_eq!(total.dropped_chunks, 1);
        assert!(total.summary().contains("NAKs: 1"));
    }

    #[test]
    fn test_window_is_bounded() {
        let mut stats = TransferStats::new(4);
        for _ in 0..10 {
            stats.record_sent(100, false);
        }
        assert_eq!(stats.recent.len(), 4);
        assert_eq!(stats.chunks_sent, 10);
    }
}
