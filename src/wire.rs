//! 청크 와이어 포맷
//!
//! - V1: 48바이트 고정 헤더 (리틀 엔디언)
//! - V2: 가변 길이 헤더 + TLV (빅 엔디언), 데이터 헤더 분리

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::chunk::{Chunk, ChunkFlags, ChunkHeader};
use crate::{Error, Result};

/// V1 헤더 크기
pub const V1_HEADER_SIZE: usize = 48;

/// V2 전송 헤더 고정부 크기
const V2_BASE_HEADER_SIZE: usize = 8;

/// V2 데이터 헤더 고정부 크기
const V2_BASE_DATA_HEADER_SIZE: usize = 8;

const V2_OP_RAK: u8 = 0x02;

const V2_TLV_ACK: u8 = 0x02;
const V2_TLV_NAK: u8 = 0x03;

const V2_DATA_TLV_REMAINING: u8 = 0x01;
const V2_DATA_TLV_BLOB_SIZE: u8 = 0x02;

const V2_TF_FIRST: u8 = 0x01;
const V2_TF_FILE: u8 = 0x04;

/// 와이어 포맷 세대
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WireVersion {
    #[default]
    V1,
    V2,
}

impl WireVersion {
    pub fn number(self) -> u8 {
        match self {
            WireVersion::V1 => 1,
            WireVersion::V2 => 2,
        }
    }

    /// 청크를 바이트로 직렬화
    pub fn encode(self, chunk: &Chunk) -> Bytes {
        match self {
            WireVersion::V1 => encode_v1(chunk),
            WireVersion::V2 => encode_v2(chunk),
        }
    }

    /// 바이트에서 청크 역직렬화
    pub fn decode(self, data: &[u8]) -> Result<Chunk> {
        match self {
            WireVersion::V1 => decode_v1(data),
            WireVersion::V2 => decode_v2(data),
        }
    }
}

/// V1 원시 헤더
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct V1Header {
    pub session_id: u32,
    pub blob_id: u32,
    pub offset: u64,
    pub blob_size: u64,
    pub chunk_size: u32,
    pub flags: u32,
    pub dw1: u32,
    pub dw2: u32,
    pub qw1: u64,
}

impl V1Header {
    pub fn write(&self, buf: &mut BytesMut) {
        buf.reserve(V1_HEADER_SIZE);
        buf.put_u32_le(self.session_id);
        buf.put_u32_le(self.blob_id);
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.blob_size);
        buf.put_u32_le(self.chunk_size);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.dw1);
        buf.put_u32_le(self.dw2);
        buf.put_u64_le(self.qw1);
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < V1_HEADER_SIZE {
            return Err(Error::chunk_parse(format!(
                "V1 청크는 최소 {}바이트, got {}",
                V1_HEADER_SIZE,
                data.len()
            )));
        }

        let mut buf = &data[..V1_HEADER_SIZE];
        Ok(Self {
            session_id: buf.get_u32_le(),
            blob_id: buf.get_u32_le(),
            offset: buf.get_u64_le(),
            blob_size: buf.get_u64_le(),
            chunk_size: buf.get_u32_le(),
            flags: buf.get_u32_le(),
            dw1: buf.get_u32_le(),
            dw2: buf.get_u32_le(),
            qw1: buf.get_u64_le(),
        })
    }

    /// Nonce를 dw1/dw2/qw1에 기록하고 KEY 플래그 설정
    pub fn set_nonce(&mut self, nonce: Uuid) {
        let bytes = nonce.as_bytes();
        self.dw1 = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.dw2 = u16::from_be_bytes([bytes[4], bytes[5]]) as u32
            | (u16::from_be_bytes([bytes[6], bytes[7]]) as u32) << 16;
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&bytes[8..16]);
        self.qw1 = u64::from_le_bytes(tail);
        self.flags |= ChunkFlags::KEY.bits();
    }

    /// KEY 플래그가 있을 때만 Nonce 반환
    pub fn nonce(&self) -> Option<Uuid> {
        if self.flags & ChunkFlags::KEY.bits() == 0 {
            return None;
        }

        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.dw1.to_be_bytes());
        bytes[4..6].copy_from_slice(&((self.dw2 & 0xFFFF) as u16).to_be_bytes());
        bytes[6..8].copy_from_slice(&((self.dw2 >> 16) as u16).to_be_bytes());
        bytes[8..16].copy_from_slice(&self.qw1.to_le_bytes());
        Some(Uuid::from_bytes(bytes))
    }
}

fn encode_v1(chunk: &Chunk) -> Bytes {
    let mut flags = chunk.header.flags;
    // V1은 ACK 요청을 플래그가 아닌 위치로 판단
    flags.remove(ChunkFlags::REQUIRE_ACK);

    let acked_id = if chunk.is_ack() || chunk.is_nak() {
        chunk.header.acked_id
    } else {
        0
    };

    let header = V1Header {
        session_id: chunk.header.session_id,
        blob_id: chunk.header.blob_id,
        offset: chunk.header.offset,
        blob_size: chunk.header.blob_size,
        chunk_size: chunk.size() as u32,
        flags: flags.bits(),
        dw1: chunk.header.id,
        dw2: acked_id,
        qw1: 0,
    };

    let mut buf = BytesMut::with_capacity(V1_HEADER_SIZE + chunk.size());
    header.write(&mut buf);
    buf.extend_from_slice(&chunk.payload);
    buf.freeze()
}

fn decode_v1(data: &[u8]) -> Result<Chunk> {
    let header = V1Header::read(data)?;
    let body = &data[V1_HEADER_SIZE..];

    let mut chunk_size = header.chunk_size as usize;
    // 블롭 전체를 담은 청크는 chunk_size가 0일 수 있음
    if header.blob_size == body.len() as u64 && chunk_size == 0 {
        chunk_size = body.len();
    }
    let chunk_end = header
        .offset
        .checked_add(chunk_size as u64)
        .ok_or_else(|| Error::chunk_parse("V1 오프셋 오버플로"))?;
    if chunk_end > header.blob_size {
        warn!(
            "청크 끝이 블롭 크기 초과: offset={}, size={}, blob_size={}",
            header.offset, chunk_size, header.blob_size
        );
        chunk_size = body.len();
    }
    let payload = Bytes::copy_from_slice(&body[..chunk_size.min(body.len())]);

    let mut flags = ChunkFlags::from_bits(header.flags);
    let is_ack = flags.contains(ChunkFlags::ACK) || flags.contains(ChunkFlags::NAK);
    if !is_ack
        && !flags.is_control()
        && header.offset.checked_add(payload.len() as u64) == Some(header.blob_size)
    {
        flags.insert(ChunkFlags::REQUIRE_ACK);
    }

    Ok(Chunk {
        header: ChunkHeader {
            id: header.dw1,
            session_id: header.session_id,
            blob_id: header.blob_id,
            offset: header.offset,
            blob_size: header.blob_size,
            flags,
            acked_id: if is_ack { header.dw2 } else { 0 },
        },
        application_id: 0,
        payload,
    })
}

fn pad4(buf: &mut BytesMut, start: usize) {
    while (buf.len() - start) % 4 != 0 {
        buf.put_u8(0);
    }
}

fn encode_v2(chunk: &Chunk) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + chunk.size());

    // 전송 헤더
    let op_code = if chunk.header.flags.contains(ChunkFlags::REQUIRE_ACK) {
        V2_OP_RAK
    } else {
        0
    };
    buf.put_u8(0); // header_len, 아래에서 채움
    buf.put_u8(op_code);
    buf.put_u16(0); // data_len, 아래에서 채움
    buf.put_u32(chunk.header.id);
    if chunk.is_ack() {
        buf.put_u8(V2_TLV_ACK);
        buf.put_u8(4);
        buf.put_u32(chunk.header.acked_id);
    }
    if chunk.is_nak() {
        buf.put_u8(V2_TLV_NAK);
        buf.put_u8(4);
        buf.put_u32(chunk.header.acked_id);
    }
    pad4(&mut buf, 0);
    let header_len = buf.len();
    buf[0] = header_len as u8;

    // 데이터 헤더 (제어 청크는 생략)
    if !chunk.is_control() {
        let data_start = buf.len();
        let mut tf = 0u8;
        if chunk.header.offset == 0 {
            tf |= V2_TF_FIRST;
        }
        if chunk.header.flags.contains(ChunkFlags::FILE) {
            tf |= V2_TF_FILE;
        }
        let remaining = chunk
            .header
            .blob_size
            .saturating_sub(chunk.header.offset.saturating_add(chunk.size() as u64));

        buf.put_u8(0); // data header len
        buf.put_u8(tf);
        buf.put_u16(chunk.header.blob_id as u16);
        buf.put_u32(chunk.header.session_id);
        buf.put_u8(V2_DATA_TLV_REMAINING);
        buf.put_u8(8);
        buf.put_u64(remaining);
        buf.put_u8(V2_DATA_TLV_BLOB_SIZE);
        buf.put_u8(8);
        buf.put_u64(chunk.header.blob_size);
        pad4(&mut buf, data_start);

        let data_header_len = buf.len() - data_start;
        buf[data_start] = data_header_len as u8;
        buf.extend_from_slice(&chunk.payload);

        let data_len = (data_header_len + chunk.size()) as u16;
        buf[2..4].copy_from_slice(&data_len.to_be_bytes());
    }

    buf.freeze()
}

/// TLV 목록 순회 (0 = 패딩)
fn read_tlvs(mut tlvs: &[u8], mut on_tlv: impl FnMut(u8, &[u8])) -> Result<()> {
    while tlvs.len() >= 2 {
        let kind = tlvs[0];
        if kind == 0 {
            break;
        }
        let len = tlvs[1] as usize;
        if tlvs.len() < 2 + len {
            return Err(Error::chunk_parse("V2 TLV 길이 초과"));
        }
        on_tlv(kind, &tlvs[2..2 + len]);
        tlvs = &tlvs[2 + len..];
    }
    Ok(())
}

fn tlv_u32(value: &[u8]) -> Option<u32> {
    (value.len() == 4).then(|| (&value[..]).get_u32())
}

fn tlv_u64(value: &[u8]) -> Option<u64> {
    (value.len() == 8).then(|| (&value[..]).get_u64())
}

fn decode_v2(data: &[u8]) -> Result<Chunk> {
    if data.len() < V2_BASE_HEADER_SIZE {
        return Err(Error::chunk_parse("V2 헤더가 8바이트 미만"));
    }

    let header_len = data[0] as usize;
    let op_code = data[1];
    let data_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if header_len < V2_BASE_HEADER_SIZE || data.len() < header_len + data_len {
        return Err(Error::chunk_parse(format!(
            "V2 길이 불일치: header_len={}, data_len={}, got {}",
            header_len,
            data_len,
            data.len()
        )));
    }

    let mut flags = ChunkFlags::NONE;
    let mut acked_id = 0;
    read_tlvs(&data[V2_BASE_HEADER_SIZE..header_len], |kind, value| match kind {
        V2_TLV_ACK => {
            flags.insert(ChunkFlags::ACK);
            acked_id = tlv_u32(value).unwrap_or(0);
        }
        V2_TLV_NAK => {
            flags.insert(ChunkFlags::NAK);
            acked_id = tlv_u32(value).unwrap_or(0);
        }
        _ => {}
    })?;
    if op_code & V2_OP_RAK != 0 {
        flags.insert(ChunkFlags::REQUIRE_ACK);
    }

    let mut header = ChunkHeader {
        id,
        flags,
        acked_id,
        ..Default::default()
    };
    if data_len == 0 {
        return Ok(Chunk::new(header, 0, Bytes::new()));
    }

    let data_part = &data[header_len..header_len + data_len];
    if data_part.len() < V2_BASE_DATA_HEADER_SIZE {
        return Err(Error::chunk_parse("V2 데이터 헤더가 8바이트 미만"));
    }
    let data_header_len = data_part[0] as usize;
    if data_header_len < V2_BASE_DATA_HEADER_SIZE || data_part.len() < data_header_len {
        return Err(Error::chunk_parse("V2 데이터 헤더 길이 초과"));
    }
    let tf = data_part[1];
    header.blob_id = u16::from_be_bytes([data_part[2], data_part[3]]) as u32;
    header.session_id =
        u32::from_be_bytes([data_part[4], data_part[5], data_part[6], data_part[7]]);

    let payload = Bytes::copy_from_slice(&data_part[data_header_len..]);
    let mut remaining = 0;
    let mut blob_size = None;
    read_tlvs(
        &data_part[V2_BASE_DATA_HEADER_SIZE..data_header_len],
        |kind, value| match kind {
            V2_DATA_TLV_REMAINING => remaining = tlv_u64(value).unwrap_or(0),
            V2_DATA_TLV_BLOB_SIZE => blob_size = tlv_u64(value),
            _ => {}
        },
    )?;

    let rest = remaining
        .checked_add(payload.len() as u64)
        .ok_or_else(|| Error::chunk_parse("V2 남은 바이트 오버플로"))?;
    // 전체 크기 TLV가 없으면 첫 청크 기준으로 추정
    let blob_size = blob_size.unwrap_or(rest);
    header.blob_size = blob_size;
    header.offset = blob_size
        .checked_sub(rest)
        .ok_or_else(|| Error::chunk_parse("V2 남은 바이트가 블롭 크기 초과"))?;

    if tf & V2_TF_FILE != 0 {
        header.flags.insert(ChunkFlags::FILE);
    }
    if tf & V2_TF_FIRST != 0 && header.offset != 0 {
        warn!("V2 첫 청크 표시와 오프셋 불일치: offset={}", header.offset);
    }

    Ok(Chunk::new(header, 0, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Blob;

    fn sample_chunks() -> Vec<Chunk> {
        let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let mut blob = Blob::outgoing(crate::application_id::FILE_TRANSFER, 55, &data, Some(4321));
        let mut id = 10_000;
        let mut chunks = Vec::new();
        while !blob.is_complete() {
            let mut chunk = blob.next_chunk(128);
            chunk.header.id = id;
            id = chunk.next_id();
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn test_v1_data_chunk() {
        let chunks = sample_chunks();
        let bytes = WireVersion::V1.encode(&chunks[1]);
        assert_eq!(bytes.len(), V1_HEADER_SIZE + 128);

        let restored = WireVersion::V1.decode(&bytes).unwrap();
        assert_eq!(restored.header.id, chunks[1].header.id);
        assert_eq!(restored.header.offset, 128);
        assert_eq!(restored.header.blob_size, 300);
        assert_eq!(restored.header.blob_id, 4321);
        assert_eq!(restored.payload, chunks[1].payload);
        assert!(!restored.requires_ack());

        // 마지막 청크는 위치로 ACK 요청 판단
        let last = WireVersion::V1.decode(&WireVersion::V1.encode(&chunks[2])).unwrap();
        assert!(last.requires_ack());
        assert_eq!(last.ack_id(), chunks[2].ack_id());
    }

    #[test]
    fn test_v1_ack_chunk() {
        let chunks = sample_chunks();
        let mut ack = chunks[2].create_ack();
        ack.header.id = 777;

        let restored = WireVersion::V1.decode(&WireVersion::V1.encode(&ack)).unwrap();
        assert!(restored.is_ack());
        assert!(!restored.requires_ack());
        assert_eq!(restored.header.acked_id, chunks[2].ack_id());
        assert_eq!(restored.header.id, 777);
    }

    #[test]
    fn test_v1_too_short() {
        assert!(matches!(
            WireVersion::V1.decode(&[0u8; 20]),
            Err(Error::ChunkParse { .. })
        ));
    }

    #[test]
    fn test_v1_nonce() {
        let nonce = Uuid::new_v4();
        let mut header = V1Header {
            blob_id: 1234,
            ..Default::default()
        };
        assert_eq!(header.nonce(), None);

        header.set_nonce(nonce);
        let mut buf = BytesMut::new();
        header.write(&mut buf);

        let restored = V1Header::read(&buf).unwrap();
        assert_eq!(restored.nonce(), Some(nonce));
    }

    #[test]
    fn test_v2_data_and_ack_chunks() {
        let chunks = sample_chunks();
        for chunk in &chunks {
            let restored = WireVersion::V2.decode(&WireVersion::V2.encode(chunk)).unwrap();
            assert_eq!(restored.header.id, chunk.header.id);
            assert_eq!(restored.header.offset, chunk.header.offset);
            assert_eq!(restored.header.blob_size, 300);
            assert_eq!(restored.header.session_id, 55);
            assert_eq!(restored.header.blob_id, 4321 & 0xFFFF);
            assert_eq!(restored.requires_ack(), chunk.requires_ack());
            assert!(restored.header.flags.contains(ChunkFlags::FILE));
            assert_eq!(restored.payload, chunk.payload);
        }

        let mut ack = chunks[2].create_ack();
        ack.header.id = 99;
        let bytes = WireVersion::V2.encode(&ack);
        assert_eq!(bytes.len(), 16);
        let restored = WireVersion::V2.decode(&bytes).unwrap();
        assert!(restored.is_ack());
        assert_eq!(restored.header.acked_id, chunks[2].ack_id());
        assert_eq!(restored.size(), 0);
    }

    #[test]
    fn test_v2_truncated() {
        let chunks = sample_chunks();
        let bytes = WireVersion::V2.encode(&chunks[0]);
        assert!(WireVersion::V2.decode(&bytes[..bytes.len() - 10]).is_err());
        assert!(WireVersion::V2.decode(&bytes[..4]).is_err());
    }

    #[test]
    fn test_v1_offset_overflow_rejected() {
        let header = V1Header {
            session_id: 9,
            blob_id: 1,
            offset: u64::MAX,
            blob_size: u64::MAX,
            chunk_size: 4,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        buf.extend_from_slice(&[1, 2, 3, 4]);

        assert!(matches!(
            WireVersion::V1.decode(&buf),
            Err(Error::ChunkParse { .. })
        ));
    }

    #[test]
    fn test_v2_remaining_overflow_rejected() {
        let mut buf = BytesMut::new();
        // 전송 헤더: header_len=8, data_len=21
        buf.put_u8(8);
        buf.put_u8(0);
        buf.put_u16(21);
        buf.put_u32(1000);
        // 데이터 헤더: REMAINING = u64::MAX, BLOB_SIZE 없음
        buf.put_u8(20);
        buf.put_u8(0);
        buf.put_u16(1);
        buf.put_u32(9);
        buf.put_u8(V2_DATA_TLV_REMAINING);
        buf.put_u8(8);
        buf.put_u64(u64::MAX);
        buf.put_u16(0);
        buf.put_u8(7);

        assert!(matches!(
            WireVersion::V2.decode(&buf),
            Err(Error::ChunkParse { .. })
        ));
    }
}
