//! 청크와 블롭 정의
//!
//! - Blob: 완전한 논리 페이로드 (파일, 아바타, SLP 메시지 등)
//! - Chunk: 전송의 최대 크기로 제한된 와이어 단위, 시퀀스/ACK 메타데이터 포함

use std::fmt;
use std::ops::BitOr;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{application_id, generate_id, SessionId, MAX_CHUNK_ID};

/// 청크 플래그 비트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct ChunkFlags(u32);

impl ChunkFlags {
    pub const NONE: Self = Self(0);
    pub const NAK: Self = Self(0x1);
    pub const ACK: Self = Self(0x2);
    /// ACK 요청 (RAK)
    pub const REQUIRE_ACK: Self = Self(0x4);
    pub const RST: Self = Self(0x8);
    pub const FILE: Self = Self(0x10);
    pub const EACH: Self = Self(0x20);
    pub const CAN: Self = Self(0x40);
    pub const ERR: Self = Self(0x80);
    pub const KEY: Self = Self(0x100);
    pub const CRYPT: Self = Self(0x200);
    pub const UNKNOWN: Self = Self(0x0100_0000);

    /// 데이터 흐름에 참여하지 않는 제어 비트
    const CONTROL_MASK: u32 = 0x1 | 0x2 | 0x8 | 0x40 | 0x80;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn is_control(self) -> bool {
        self.0 & Self::CONTROL_MASK != 0
    }
}

impl BitOr for ChunkFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// `id + len`을 31비트 범위에서 감싼 다음 청크 ID (0은 1로 치환)
pub fn next_chunk_id(id: u32, len: usize) -> u32 {
    let next = ((id as u64 + len as u64) % MAX_CHUNK_ID as u64) as u32;
    if next == 0 {
        1
    } else {
        next
    }
}

/// 청크 헤더 (와이어 버전 무관 모델)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkHeader {
    /// 로컬 청크 ID (송신 시 전송 카운터에서 할당)
    pub id: u32,

    /// 세션 ID (0 = 시그널링)
    pub session_id: SessionId,

    /// 블롭 ID
    pub blob_id: u32,

    /// 블롭 내 오프셋 (바이트)
    pub offset: u64,

    /// 전체 블롭 크기
    pub blob_size: u64,

    /// 플래그
    pub flags: ChunkFlags,

    /// ACK/NAK 청크일 때 확인 대상 ID
    pub acked_id: u32,
}

/// 청크 (전송 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub header: ChunkHeader,

    /// 릴레이 푸터로 운반되는 애플리케이션 ID
    pub application_id: u32,

    pub payload: Bytes,
}

impl Chunk {
    pub fn new(header: ChunkHeader, application_id: u32, payload: Bytes) -> Self {
        Self {
            header,
            application_id,
            payload,
        }
    }

    /// 페이로드 길이
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn session_id(&self) -> SessionId {
        self.header.session_id
    }

    pub fn blob_id(&self) -> u32 {
        self.header.blob_id
    }

    pub fn next_id(&self) -> u32 {
        next_chunk_id(self.header.id, self.size())
    }

    /// 이 청크에 대해 기다리는 ACK ID
    pub fn ack_id(&self) -> u32 {
        self.next_id()
    }

    pub fn is_ack(&self) -> bool {
        self.header.flags.contains(ChunkFlags::ACK)
    }

    pub fn is_nak(&self) -> bool {
        self.header.flags.contains(ChunkFlags::NAK)
    }

    pub fn is_control(&self) -> bool {
        self.header.flags.is_control()
    }

    pub fn requires_ack(&self) -> bool {
        !self.is_ack() && !self.is_nak() && self.header.flags.contains(ChunkFlags::REQUIRE_ACK)
    }

    /// 블롭의 마지막 청크인지
    pub fn is_final(&self) -> bool {
        self.header.offset + self.size() as u64 == self.header.blob_size
    }

    pub fn is_signaling(&self) -> bool {
        self.header.session_id == 0 && !self.is_control()
    }

    /// 데이터 전송 준비 프로브 (4바이트 0 페이로드, FILE 플래그 없음)
    pub fn is_data_preparation(&self) -> bool {
        self.header.session_id != 0
            && self.header.blob_size == 4
            && self.payload.as_ref() == [0u8; 4]
            && !self.header.flags.contains(ChunkFlags::FILE)
    }

    /// 이 청크에 대한 ACK 청크 생성
    pub fn create_ack(&self) -> Chunk {
        let mut flags = ChunkFlags::ACK;
        if self.header.flags.contains(ChunkFlags::REQUIRE_ACK) {
            flags.insert(ChunkFlags::REQUIRE_ACK);
        }

        Chunk {
            header: ChunkHeader {
                id: 0,
                session_id: self.header.session_id,
                blob_id: generate_id(),
                offset: 0,
                blob_size: 0,
                flags,
                acked_id: self.ack_id(),
            },
            application_id: 0,
            payload: Bytes::new(),
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk 0x{:x}: blob {}", self.header.id, self.header.blob_id)?;
        if self.header.session_id != 0 {
            write!(f, ", session {}", self.header.session_id)?;
        }
        if self.is_ack() {
            write!(f, ", ACK 0x{:x}", self.header.acked_id)?;
        } else if self.is_nak() {
            write!(f, ", NAK 0x{:x}", self.header.acked_id)?;
        }
        if self.size() > 0 {
            if self.header.session_id != 0 {
                write!(f, ", data [{} bytes @ {}]", self.size(), self.header.offset)?;
            } else {
                write!(f, ", SLP [{} bytes]", self.size())?;
            }
        }
        Ok(())
    }
}

/// 블롭 (완전한 논리 페이로드)
#[derive(Debug, Clone)]
pub struct Blob {
    /// 애플리케이션 ID
    pub application_id: u32,

    /// 세션 ID (0 = 시그널링)
    pub session_id: SessionId,

    /// 블롭 ID (첫 청크에서 할당되거나 호출자가 지정)
    id: Option<u32>,

    /// 데이터 버퍼 (수신측은 청크가 들어오는 대로 커짐)
    data: BytesMut,

    /// 선언된 전체 크기
    total_size: u64,

    /// 지금까지 전송/수신된 바이트
    transferred: u64,
}

impl Blob {
    /// 송신용 블롭
    pub fn outgoing(application_id: u32, session_id: SessionId, data: &[u8], id: Option<u32>) -> Self {
        Self {
            application_id,
            session_id,
            id,
            data: BytesMut::from(data),
            total_size: data.len() as u64,
            transferred: 0,
        }
    }

    /// 수신용 블롭 (크기만 선언)
    pub fn incoming(application_id: u32, session_id: SessionId, total_size: u64, id: Option<u32>) -> Self {
        Self {
            application_id,
            session_id,
            id,
            data: BytesMut::new(),
            total_size,
            transferred: 0,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn remaining(&self) -> u64 {
        self.total_size - self.transferred
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.total_size
    }

    pub fn is_signaling(&self) -> bool {
        self.session_id == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data.freeze()
    }

    /// 청크 페이로드를 오프셋 위치에 복사, 완료 여부 반환
    ///
    /// 범위 밖 청크는 경고 후 무시한다. 선언 크기 상한은 호출자가 검사한다.
    pub fn append_chunk(&mut self, chunk: &Chunk) -> bool {
        let offset = chunk.header.offset;
        let end = match offset.checked_add(chunk.size() as u64) {
            Some(end) if offset <= self.total_size => end.min(self.total_size),
            _ => {
                warn!(
                    "블롭 범위 밖 청크 무시: offset={}, size={}, total={}",
                    offset,
                    chunk.size(),
                    self.total_size
                );
                return self.is_complete();
            }
        };
        let (Ok(start), Ok(end)) = (usize::try_from(offset), usize::try_from(end)) else {
            warn!("블롭 오프셋이 주소 공간 초과: offset={}", offset);
            return self.is_complete();
        };

        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(&chunk.payload[..end - start]);

        self.transferred = self
            .transferred
            .saturating_add((end - start) as u64)
            .min(self.total_size);
        self.is_complete()
    }

    /// 남은 바이트에서 다음 청크 생성 (최대 `max_size` 바이트)
    pub fn next_chunk(&mut self, max_size: usize) -> Chunk {
        let blob_id = *self.id.get_or_insert_with(generate_id);
        let offset = self.transferred;
        let len = (max_size as u64).min(self.remaining()) as usize;
        let start = offset as usize;
        let payload = Bytes::copy_from_slice(&self.data[start..start + len]);
        self.transferred += len as u64;

        let mut flags = ChunkFlags::NONE;
        let preparation = self.total_size == 4 && payload.as_ref() == [0u8; 4];
        if self.session_id != 0 && !preparation {
            flags.insert(ChunkFlags::EACH);
            if self.application_id == application_id::FILE_TRANSFER {
                flags.insert(ChunkFlags::FILE);
            }
        }
        if self.is_complete() {
            flags.insert(ChunkFlags::REQUIRE_ACK);
        }

        Chunk {
            header: ChunkHeader {
                id: 0,
                session_id: self.session_id,
                blob_id,
                offset,
                blob_size: self.total_size,
                flags,
                acked_id: 0,
            },
            application_id: self.application_id,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_split_offsets_and_sizes() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let mut blob = Blob::outgoing(application_id::FILE_TRANSFER, 42, &data, None);

        let mut chunks = Vec::new();
        while !blob.is_complete() {
            chunks.push(blob.next_chunk(1250));
        }

        let offsets: Vec<u64> = chunks.iter().map(|c| c.header.offset).collect();
        let sizes: Vec<usize> = chunks.iter().map(|c| c.size()).collect();
        assert_eq!(offsets, vec![0, 1250, 2500]);
        assert_eq!(sizes, vec![1250, 1250, 500]);

        // 블롭 ID는 첫 청크에서 한 번만 할당
        let blob_id = chunks[0].header.blob_id;
        assert!(chunks.iter().all(|c| c.header.blob_id == blob_id));
        assert!(blob_id >= crate::MIN_GENERATED_ID);

        // 마지막 청크만 ACK 요청
        assert!(!chunks[0].requires_ack());
        assert!(!chunks[1].requires_ack());
        assert!(chunks[2].requires_ack());
        assert!(chunks[2].header.flags.contains(ChunkFlags::FILE));
    }

    #[test]
    fn test_blob_reassembly_round_trip() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut outgoing = Blob::outgoing(application_id::WEBCAM, 7, &data, Some(1234));
        let mut incoming = Blob::incoming(application_id::WEBCAM, 7, data.len() as u64, None);

        let mut complete = false;
        while !outgoing.is_complete() {
            let chunk = outgoing.next_chunk(1100);
            assert!(chunk.size() <= 1100);
            complete = incoming.append_chunk(&chunk);
        }

        assert!(complete);
        assert_eq!(incoming.transferred(), 5000);
        assert_eq!(incoming.into_data().as_ref(), data.as_slice());
    }

    #[test]
    fn test_append_never_exceeds_total() {
        let mut blob = Blob::incoming(0, 3, 10, None);
        let chunk = Chunk::new(
            ChunkHeader {
                session_id: 3,
                offset: 6,
                blob_size: 10,
                ..Default::default()
            },
            0,
            Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
        );

        assert!(!blob.append_chunk(&chunk));
        assert_eq!(blob.transferred(), 4);
        assert_eq!(&blob.data()[6..10], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_append_overflowing_offset_ignored() {
        let mut blob = Blob::incoming(0, 3, u64::MAX, None);
        let chunk = Chunk::new(
            ChunkHeader {
                session_id: 3,
                offset: u64::MAX - 2,
                blob_size: u64::MAX,
                ..Default::default()
            },
            0,
            Bytes::from_static(&[1, 2, 3, 4]),
        );

        assert!(!blob.append_chunk(&chunk));
        assert_eq!(blob.transferred(), 0);
        assert!(blob.data().is_empty());
    }

    #[test]
    fn test_next_chunk_id_wraps() {
        assert_eq!(next_chunk_id(1000, 1250), 2250);
        assert_eq!(next_chunk_id(MAX_CHUNK_ID - 10, 20), 10);
        assert_eq!(next_chunk_id(MAX_CHUNK_ID - 1, 1), 1);
        assert_eq!(next_chunk_id(5000, 0), 5000);
    }

    #[test]
    fn test_ack_chunk() {
        let mut blob = Blob::outgoing(0, 9, &[0xAB; 100], None);
        let mut chunk = blob.next_chunk(1250);
        chunk.header.id = 4000;

        let ack = chunk.create_ack();
        assert!(ack.is_ack());
        assert!(ack.is_control());
        assert!(!ack.requires_ack());
        assert_eq!(ack.header.acked_id, 4100);
        assert_eq!(ack.session_id(), 9);
        assert_eq!(ack.size(), 0);
    }

    #[test]
    fn test_data_preparation_detection() {
        let mut blob = Blob::outgoing(application_id::DISPLAY_PICTURE_TRANSFER, 77, &[0; 4], None);
        let chunk = blob.next_chunk(1250);
        assert!(chunk.is_data_preparation());
        assert!(!chunk.header.flags.contains(ChunkFlags::EACH));

        let mut data = Blob::outgoing(application_id::FILE_TRANSFER, 77, &[0, 0, 0, 1], None);
        let chunk = data.next_chunk(1250);
        assert!(!chunk.is_data_preparation());
        assert!(chunk.header.flags.contains(ChunkFlags::FILE));

        let mut signaling = Blob::outgoing(0, 0, &[0; 4], None);
        assert!(!signaling.next_chunk(1250).is_data_preparation());
    }
}
