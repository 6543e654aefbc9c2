//! NAT 통과 도우미
//!
//! 1. 에코 단계: 에코 서버에 20바이트 요청을 보내고, 응답에서 XOR로 가려진
//!    외부 (ip, port)를 읽음
//! 2. 펀칭 단계: 에코에 쓴 로컬 포트에서 listen과 connect를 동시에 시도
//!
//! 에코 단계가 실패하면 일반 연결로 대신한다. 재시도는 하지 않는다.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::manager::TransportManager;
use crate::{Config, Error, Result};

/// 에코 요청 패킷
pub const ECHO_REQUEST: [u8; 20] = [
    0x02, 0x01, 0x41, 0x31, 0x41, 0x31, 0x41, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x5d, 0x00, 0x00, 0x00,
];

pub const ECHO_PACKET_SIZE: usize = 20;

const PORT_MASK: u16 = 0x4131;
const IP_MASK: u32 = 0x4131_4131;

/// 에코 서버 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub version: u8,
    pub code: u8,
    /// 외부 포트 (마스크 해제됨)
    pub port: u16,
    /// 외부 IP (마스크 해제됨)
    pub ip: Ipv4Addr,
    pub discard_port: u16,
    pub test_port: u16,
    pub test_ip: Ipv4Addr,
    pub transaction_id: u32,
}

impl EchoReply {
    /// 20바이트 응답 파싱 (빅 엔디언)
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != ECHO_PACKET_SIZE {
            return Err(Error::EchoReply {
                reason: format!("20바이트가 아님: {}", data.len()),
            });
        }

        let mut buf = data;
        Ok(Self {
            version: buf.get_u8(),
            code: buf.get_u8(),
            port: buf.get_u16() ^ PORT_MASK,
            ip: Ipv4Addr::from(buf.get_u32() ^ IP_MASK),
            discard_port: buf.get_u16(),
            test_port: buf.get_u16(),
            test_ip: Ipv4Addr::from(buf.get_u32()),
            transaction_id: buf.get_u32(),
        })
    }

    /// 마스크를 씌운 응답 바이트
    pub fn encode(&self) -> [u8; ECHO_PACKET_SIZE] {
        let mut buf = BytesMut::with_capacity(ECHO_PACKET_SIZE);
        buf.put_u8(self.version);
        buf.put_u8(self.code);
        buf.put_u16(self.port ^ PORT_MASK);
        buf.put_u32(u32::from(self.ip) ^ IP_MASK);
        buf.put_u16(self.discard_port);
        buf.put_u16(self.test_port);
        buf.put_u32(u32::from(self.test_ip));
        buf.put_u32(self.transaction_id);

        let mut out = [0u8; ECHO_PACKET_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn external_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

/// 에코 단계 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    /// 에코 요청에 쓴 로컬 주소
    pub local: SocketAddr,
    /// 에코 서버가 본 외부 주소
    pub external: SocketAddr,
}

/// 펀칭/연결 결과
#[derive(Debug)]
pub enum PunchOutcome {
    /// 로컬 포트로 들어온 연결
    Accepted(TcpStream, SocketAddr),
    /// 로컬 포트에서 나간 연결
    Punched(TcpStream),
    /// 에코 실패 후 일반 연결
    Conventional(TcpStream),
}

impl PunchOutcome {
    pub fn into_stream(self) -> TcpStream {
        match self {
            PunchOutcome::Accepted(stream, _)
            | PunchOutcome::Punched(stream)
            | PunchOutcome::Conventional(stream) => stream,
        }
    }
}

/// 같은 로컬 포트를 여러 소켓이 공유할 수 있는 TCP 소켓
fn reusable_socket(local: SocketAddr) -> Result<TcpSocket> {
    let socket = match local {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.set_keepalive(true)?;
    socket.bind(local)?;
    Ok(socket)
}

fn any_port(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
}

/// NAT 통과 도우미
pub struct NatTraversal {
    config: Config,
}

impl NatTraversal {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// 에코 단계
    pub async fn discover(&self) -> Result<Discovery> {
        let socket = reusable_socket(any_port(0))?;
        let mut stream = tokio::time::timeout(
            self.config.echo_timeout(),
            socket.connect(self.config.echo_server),
        )
        .await
        .map_err(|_| Error::Timeout { what: "echo connect" })??;

        let local = stream.local_addr()?;
        info!("에코 서버 요청 송신 ({})", local);
        stream.write_all(&ECHO_REQUEST).await?;

        let mut reply = [0u8; ECHO_PACKET_SIZE];
        tokio::time::timeout(self.config.echo_timeout(), stream.read_exact(&mut reply))
            .await
            .map_err(|_| Error::Timeout { what: "echo reply" })??;

        let reply = EchoReply::parse(&reply)?;
        info!("에코 서버 응답: 외부 주소 {}", reply.external_addr());
        Ok(Discovery {
            local,
            external: reply.external_addr(),
        })
    }

    /// 펀칭 단계: `local_port`에서 listen과 `peer`로 connect를 동시에 시도, 먼저 성공한 쪽 반환
    pub async fn punch(&self, local_port: u16, peer: SocketAddr) -> Result<PunchOutcome> {
        info!("펀칭: 로컬 포트 {} listen, {}로 connect", local_port, peer);
        let listener = reusable_socket(any_port(local_port))?.listen(1)?;
        let connector = reusable_socket(any_port(local_port))?;

        let connect = connector.connect(peer);
        let accept = listener.accept();
        let deadline = tokio::time::sleep(self.config.punch_timeout());
        tokio::pin!(connect, accept, deadline);

        let mut connect_failed = false;
        let mut accept_failed = false;
        loop {
            tokio::select! {
                result = &mut connect, if !connect_failed => match result {
                    Ok(stream) => return Ok(PunchOutcome::Punched(stream)),
                    Err(e) => {
                        debug!("펀칭 connect 실패: {}", e);
                        connect_failed = true;
                    }
                },
                result = &mut accept, if !accept_failed => match result {
                    Ok((stream, addr)) => return Ok(PunchOutcome::Accepted(stream, addr)),
                    Err(e) => {
                        debug!("펀칭 listen 실패: {}", e);
                        accept_failed = true;
                    }
                },
                _ = &mut deadline => return Err(Error::Timeout { what: "nat punch" }),
            }

            if connect_failed && accept_failed {
                return Err(Error::Timeout { what: "nat punch" });
            }
        }
    }

    /// 일반 연결
    pub async fn connect_conventional(&self, peer: SocketAddr) -> Result<TcpStream> {
        info!("일반 연결: {}", peer);
        tokio::time::timeout(self.config.direct_connect_timeout(), TcpStream::connect(peer))
            .await
            .map_err(|_| Error::Timeout { what: "direct connect" })?
            .map_err(Error::from)
    }

    /// 에코 → 주소 갱신 → 지연 → 펀칭, 에코 실패 시 일반 연결
    pub async fn run(&self, manager: &Arc<TransportManager>, peer: SocketAddr) -> Result<PunchOutcome> {
        match self.discover().await {
            Ok(discovery) => {
                manager.update_transport_addresses(discovery.local, discovery.external);
                tokio::time::sleep(self.config.punch_delay()).await;
                self.punch(discovery.local.port(), peer).await
            }
            Err(e) => {
                warn!("에코 단계 실패, 일반 연결로 대체: {}", e);
                Ok(PunchOutcome::Conventional(self.connect_conventional(peer).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EndpointId, LocalEndpoint};
    use tokio::net::TcpListener;

    /// 접속한 소켓 주소를 그대로 돌려주는 에코 서버
    async fn spawn_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, peer) = listener.accept().await.unwrap();
            let mut request = [0u8; ECHO_PACKET_SIZE];
            stream.read_exact(&mut request).await.unwrap();
            assert_eq!(request, ECHO_REQUEST);

            let SocketAddr::V4(peer) = peer else {
                panic!("ipv4 expected");
            };
            let reply = EchoReply {
                version: 2,
                code: 2,
                port: peer.port(),
                ip: *peer.ip(),
                discard_port: 0,
                test_port: 7001,
                test_ip: Ipv4Addr::LOCALHOST,
                transaction_id: 12,
            };
            stream.write_all(&reply.encode()).await.unwrap();
        });
        addr
    }

    fn config(echo_server: SocketAddr) -> Config {
        Config {
            echo_server,
            ..Config::lan()
        }
    }

    #[test]
    fn test_echo_reply_unmasking() {
        let mut raw = [0u8; ECHO_PACKET_SIZE];
        raw[0] = 2;
        raw[1] = 1;
        raw[2..4].copy_from_slice(&(40000u16 ^ 0x4131).to_be_bytes());
        raw[4..8].copy_from_slice(&(u32::from(Ipv4Addr::new(203, 0, 113, 9)) ^ 0x4131_4131).to_be_bytes());
        raw[16..20].copy_from_slice(&12u32.to_be_bytes());

        let reply = EchoReply::parse(&raw).unwrap();
        assert_eq!(reply.external_addr(), "203.0.113.9:40000".parse::<SocketAddr>().unwrap());
        assert_eq!(reply.transaction_id, 12);
        assert_eq!(reply.encode(), raw);

        assert!(matches!(EchoReply::parse(&raw[..19]), Err(Error::EchoReply { .. })));
    }

    #[tokio::test]
    async fn test_discover_against_local_echo_server() {
        let echo = spawn_echo_server().await;
        let nat = NatTraversal::new(config(echo));

        let discovery = nat.discover().await.unwrap();
        assert_eq!(discovery.external.port(), discovery.local.port());
        assert_eq!(discovery.external.ip(), discovery.local.ip());
    }

    #[tokio::test]
    async fn test_punch_connects_outward() {
        let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let free_port = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().port();

        let nat = NatTraversal::new(Config::lan());
        let outcome = nat.punch(free_port, peer_addr).await.unwrap();
        let stream = match outcome {
            PunchOutcome::Punched(stream) => stream,
            other => panic!("punched expected, got {:?}", other),
        };
        assert_eq!(stream.local_addr().unwrap().port(), free_port);
        let (_, remote) = peer.accept().await.unwrap();
        assert_eq!(remote.port(), free_port);
    }

    #[tokio::test]
    async fn test_run_updates_manager_addresses() {
        let echo = spawn_echo_server().await;
        let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let local = LocalEndpoint::new("alice@example.com", EndpointId::random());
        let (manager, _events) = TransportManager::new(config(echo), local, None, None);
        let nat = NatTraversal::new(config(echo));

        let outcome = nat.run(&manager, peer_addr).await.unwrap();
        assert!(matches!(outcome, PunchOutcome::Punched(_) | PunchOutcome::Accepted(..)));
        let (_, external) = manager.local_candidates().expect("addresses");
        assert_eq!(external.ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_echo_failure_falls_back_to_conventional() {
        // 닫힌 포트를 에코 서버로 지정
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let local = LocalEndpoint::new("alice@example.com", EndpointId::random());
        let (manager, _events) = TransportManager::new(config(closed), local, None, None);
        let nat = NatTraversal::new(config(closed));

        let outcome = nat.run(&manager, peer_addr).await.unwrap();
        assert!(matches!(outcome, PunchOutcome::Conventional(_)));
        assert!(manager.local_candidates().is_none());
    }
}
