//! 릴레이 전송 (공유 채팅 세션)
//!
//! 캐리어 메시지 형식:
//! - Content-Type: `application/x-msnmsgrp2p`
//! - V1: `P2P-Dest: account`
//! - V2: `P2P-Src: account;{guid}`, `P2P-Dest: account;{guid}`
//! - 바디: 청크 바이트 + 애플리케이션 ID (u32 BE)

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::chunk::Chunk;
use crate::slp::Headers;
use crate::transport::{AckMode, Carrier, CarrierMessage};
use crate::wire::WireVersion;
use crate::{EndpointId, Error, LocalEndpoint, PeerId, Result, P2P_CONTENT_TYPE};

const P2P_SRC: &str = "P2P-Src";
const P2P_DEST: &str = "P2P-Dest";

/// 릴레이 송신 수단
pub(crate) struct RelayLink {
    carrier: Arc<dyn Carrier>,
    local: LocalEndpoint,
}

impl RelayLink {
    pub(crate) fn new(carrier: Arc<dyn Carrier>, local: LocalEndpoint) -> Self {
        Self { carrier, local }
    }

    pub(crate) fn send(
        &self,
        peer: &PeerId,
        endpoint: Option<EndpointId>,
        version: WireVersion,
        chunk: &Chunk,
    ) -> Result<()> {
        let message = encode_message(&self.local, peer, endpoint, version, chunk);
        self.carrier.deliver(message)
    }
}

/// 청크를 캐리어 메시지로 포장
///
/// 상대 엔드포인트를 모르면 V2를 표현할 수 없으므로 V1로 보낸다.
pub fn encode_message(
    local: &LocalEndpoint,
    peer: &PeerId,
    endpoint: Option<EndpointId>,
    version: WireVersion,
    chunk: &Chunk,
) -> CarrierMessage {
    let mut headers = Headers::new();
    let version = match (version, endpoint) {
        (WireVersion::V2, Some(endpoint)) => {
            headers.set(P2P_SRC, format!("{};{}", local.account, local.endpoint));
            headers.set(P2P_DEST, format!("{};{}", peer, endpoint));
            WireVersion::V2
        }
        _ => {
            headers.set(P2P_DEST, peer.account());
            WireVersion::V1
        }
    };

    let encoded = version.encode(chunk);
    let mut body = BytesMut::with_capacity(encoded.len() + 4);
    body.extend_from_slice(&encoded);
    body.put_u32(chunk.application_id);

    CarrierMessage {
        recipient: peer.clone(),
        content_type: P2P_CONTENT_TYPE.to_string(),
        headers,
        body: body.freeze(),
        ack_mode: AckMode::Data,
    }
}

/// 파싱된 수신 릴레이 메시지
#[derive(Debug, Clone)]
pub struct InboundRelay {
    pub source: PeerId,
    pub source_endpoint: Option<EndpointId>,
    pub version: WireVersion,
    pub chunk: Chunk,
}

fn split_address(value: &str) -> (&str, Option<EndpointId>) {
    match value.split_once(';') {
        Some((account, guid)) => (account.trim(), EndpointId::parse(guid)),
        None => (value.trim(), None),
    }
}

/// 캐리어 메시지 해석
///
/// 다른 로컬 엔드포인트로 향한 V2 메시지는 `Ok(None)`.
pub fn decode_message(
    local: &LocalEndpoint,
    sender: &PeerId,
    headers: &Headers,
    body: &[u8],
) -> Result<Option<InboundRelay>> {
    let mut version = WireVersion::V1;
    if let Some(dest) = headers.get(P2P_DEST) {
        if dest.contains(';') {
            version = WireVersion::V2;
            let (_, dest_endpoint) = split_address(dest);
            if dest_endpoint != Some(local.endpoint) {
                debug!("다른 엔드포인트로 향한 청크 무시: P2P-Dest={}", dest);
                return Ok(None);
            }
        }
    }

    let source_endpoint = headers
        .get(P2P_SRC)
        .and_then(|src| split_address(src).1);

    if body.len() < 4 {
        return Err(Error::chunk_parse(format!(
            "릴레이 바디가 푸터보다 짧음: {} bytes",
            body.len()
        )));
    }
    let (chunk_bytes, footer) = body.split_at(body.len() - 4);
    let mut chunk = version.decode(chunk_bytes)?;
    chunk.application_id = u32::from_be_bytes([footer[0], footer[1], footer[2], footer[3]]);

    Ok(Some(InboundRelay {
        source: sender.clone(),
        source_endpoint,
        version,
        chunk,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_id;
    use crate::chunk::Blob;
    use crate::transport::tests::local;

    fn chunk() -> Chunk {
        let mut chunk = Blob::outgoing(application_id::DISPLAY_PICTURE_TRANSFER, 17, &[9u8; 64], None).next_chunk(1250);
        chunk.header.id = 4242;
        chunk
    }

    #[test]
    fn test_v1_message() {
        let me = local();
        let bob = PeerId::from("bob@example.com");
        let message = encode_message(&me, &bob, None, WireVersion::V2, &chunk());

        assert_eq!(message.content_type, P2P_CONTENT_TYPE);
        assert_eq!(message.headers.get(P2P_DEST), Some("bob@example.com"));
        assert!(message.headers.get(P2P_SRC).is_none());
        assert_eq!(&message.body[message.body.len() - 4..], &[0, 0, 0, 12]);

        let inbound = decode_message(&me, &bob, &message.headers, &message.body)
            .unwrap()
            .unwrap();
        assert_eq!(inbound.version, WireVersion::V1);
        assert_eq!(inbound.chunk.application_id, 12);
        assert_eq!(inbound.chunk.header.id, 4242);
        assert_eq!(inbound.source_endpoint, None);
    }

    #[test]
    fn test_v2_message_addressing() {
        let alice = local();
        let bob = LocalEndpoint::new("bob@example.com", EndpointId::random());

        let message = encode_message(&alice, &bob.account, Some(bob.endpoint), WireVersion::V2, &chunk());
        assert_eq!(
            message.headers.get(P2P_DEST),
            Some(format!("bob@example.com;{}", bob.endpoint).as_str())
        );

        let inbound = decode_message(&bob, &alice.account, &message.headers, &message.body)
            .unwrap()
            .unwrap();
        assert_eq!(inbound.version, WireVersion::V2);
        assert_eq!(inbound.source_endpoint, Some(alice.endpoint));
        assert_eq!(inbound.chunk.payload.len(), 64);

        // 같은 계정의 다른 엔드포인트는 무시
        let other = LocalEndpoint::new("bob@example.com", EndpointId::random());
        assert!(decode_message(&other, &alice.account, &message.headers, &message.body)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_short_body() {
        let me = local();
        let mut headers = Headers::new();
        headers.set(P2P_DEST, "alice@example.com");
        assert!(decode_message(&me, &PeerId::from("bob@example.com"), &headers, &[1, 2]).is_err());
    }
}
