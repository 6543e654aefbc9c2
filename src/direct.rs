//! 직접 TCP 전송
//!
//! 프레임: `[len: u32 LE][body]`
//!
//! 핸드셰이크:
//! 1. 연결한 쪽이 `foo\0` 프레임과 Nonce 청크(V1, KEY 플래그)를 보냄
//! 2. 리슨한 쪽은 Nonce를 확인하고 자신의 Nonce로 응답
//! 3. 연결한 쪽도 응답 Nonce를 확인

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::Chunk;
use crate::transport::TransportId;
use crate::wire::{V1Header, WireVersion};
use crate::{braced_guid, generate_id, Error, Result};

/// 연결 직후 클라이언트가 보내는 프레임
pub const FOO: &[u8] = b"foo\0";

/// 한 프레임 최대 크기
const MAX_FRAME_SIZE: usize = 1 << 20;

/// 직접 연결 송신 수단 (writer 태스크로 프레임 전달)
pub(crate) struct DirectLink {
    writer: mpsc::UnboundedSender<Bytes>,
}

impl DirectLink {
    pub(crate) fn send(&self, id: TransportId, version: WireVersion, chunk: &Chunk) -> Result<()> {
        self.writer
            .send(frame(&version.encode(chunk)))
            .map_err(|_| Error::TransportClosed { id: id.0 })
    }
}

/// 길이 접두 프레임
pub fn frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.extend_from_slice(body);
    buf.freeze()
}

/// 프레임 하나 읽기
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::chunk_parse(format!("프레임이 너무 큼: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

/// Nonce 청크 (헤더만, 페이로드 없음)
pub fn nonce_chunk(nonce: Uuid) -> Bytes {
    let mut header = V1Header {
        blob_id: generate_id(),
        ..Default::default()
    };
    header.set_nonce(nonce);

    let mut buf = BytesMut::new();
    header.write(&mut buf);
    buf.freeze()
}

fn check_nonce(expected: Uuid, body: &[u8]) -> Result<()> {
    let header = V1Header::read(body)?;
    match header.nonce() {
        Some(nonce) if nonce == expected => Ok(()),
        Some(nonce) => {
            warn!("Nonce 불일치: local={}, remote={}", braced_guid(&expected), braced_guid(&nonce));
            Err(Error::NonceMismatch {
                expected: braced_guid(&expected),
                got: braced_guid(&nonce),
            })
        }
        None => Err(Error::chunk_parse("Nonce 청크가 아님 (KEY 플래그 없음)")),
    }
}

async fn with_timeout<T>(
    duration: Duration,
    what: &'static str,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::Timeout { what })?
}

/// 연결한 쪽 핸드셰이크
pub async fn handshake_client(stream: &mut TcpStream, nonce: Uuid, timeout: Duration) -> Result<()> {
    with_timeout(timeout, "direct handshake", async {
        stream.write_all(&frame(FOO)).await?;
        stream.write_all(&frame(&nonce_chunk(nonce))).await?;
        debug!("Nonce 송신: {}", braced_guid(&nonce));

        let reply = read_frame(stream).await?;
        check_nonce(nonce, &reply)
    })
    .await
}

/// 리슨한 쪽 핸드셰이크
pub async fn handshake_server(stream: &mut TcpStream, nonce: Uuid, timeout: Duration) -> Result<()> {
    with_timeout(timeout, "direct handshake", async {
        let foo = read_frame(stream).await?;
        if foo.as_ref() != FOO {
            debug!("예상과 다른 foo 프레임: {} bytes", foo.len());
        }

        let remote = read_frame(stream).await?;
        check_nonce(nonce, &remote)?;

        stream.write_all(&frame(&nonce_chunk(nonce))).await?;
        Ok::<_, Error>(())
    })
    .await
}

/// 타임아웃이 있는 연결 + 클라이언트 핸드셰이크
pub async fn connect(addr: SocketAddr, nonce: Uuid, timeout: Duration) -> Result<TcpStream> {
    info!("직접 연결 시도: {}", addr);
    let mut stream = with_timeout(timeout, "direct connect", async {
        Ok::<_, Error>(TcpStream::connect(addr).await?)
    })
    .await?;
    stream.set_nodelay(true)?;

    handshake_client(&mut stream, nonce, timeout).await?;
    info!("직접 연결 완료: {}", addr);
    Ok(stream)
}

/// 직접 연결 리스너
pub struct DirectListener {
    listener: TcpListener,
    port: u16,
}

impl DirectListener {
    /// `port`부터 바인드 실패 시 포트를 하나씩 올려 재시도
    pub async fn bind(port: u16, attempts: u16) -> Result<Self> {
        let mut last_error = None;
        for offset in 0..attempts.max(1) {
            let candidate = port.wrapping_add(offset);
            let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, candidate));
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    info!("직접 연결 리슨: 포트 {}", port);
                    return Ok(Self { listener, port });
                }
                Err(e) => {
                    debug!("포트 {} 바인드 실패: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map(Error::Io).unwrap_or(Error::Timeout { what: "direct listen" }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 연결 하나를 받아 서버 핸드셰이크 (리스너는 닫힘)
    pub async fn accept(self, nonce: Uuid, timeout: Duration) -> Result<TcpStream> {
        let (mut stream, addr) = with_timeout(timeout, "direct accept", async {
            Ok::<_, Error>(self.listener.accept().await?)
        })
        .await?;
        info!("피어 연결됨: {}", addr);
        stream.set_nodelay(true)?;

        handshake_server(&mut stream, nonce, timeout).await?;
        Ok(stream)
    }
}

/// 핸드셰이크가 끝난 스트림의 reader/writer 태스크
pub(crate) struct DirectIo {
    pub link: DirectLink,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// reader/writer 태스크 시작
///
/// 수신 청크는 `on_chunk`로, 연결 종료는 `on_closed`로 알린다.
pub(crate) fn spawn_io<F, C>(stream: TcpStream, version: WireVersion, on_chunk: F, on_closed: C) -> DirectIo
where
    F: Fn(Chunk) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                warn!("직접 연결 송신 에러: {}", e);
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let reader = tokio::spawn(async move {
        loop {
            let body = match read_frame(&mut read_half).await {
                Ok(body) => body,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!("직접 연결 종료");
                    break;
                }
                Err(e) => {
                    warn!("직접 연결 수신 에러: {}", e);
                    break;
                }
            };

            if body.as_ref() == [0u8; 4] {
                debug!("0000 프레임 무시");
                continue;
            }

            match version.decode(&body) {
                Ok(chunk) => on_chunk(chunk),
                Err(e) => warn!("직접 연결 청크 파싱 실패: {}", e),
            }
        }
        on_closed();
    });

    DirectIo {
        link: DirectLink { writer: tx },
        reader,
        writer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_id;
    use crate::chunk::Blob;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_handshake_and_chunk_exchange() {
        let nonce = Uuid::new_v4();
        let listener = DirectListener::bind(0, 1).await.unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], listener.port()));

        let server = tokio::spawn(async move { listener.accept(nonce, TIMEOUT).await });
        let client = connect(addr, nonce, TIMEOUT).await.unwrap();
        let server = server.await.unwrap().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        let sink = received.clone();
        let server_io = spawn_io(
            server,
            WireVersion::V1,
            move |chunk| sink.lock().push(chunk),
            move || {
                let _ = closed_tx.send(());
            },
        );
        let client_io = spawn_io(client, WireVersion::V1, |_| {}, || {});

        let mut chunk = Blob::outgoing(application_id::FILE_TRANSFER, 3, &[5u8; 700], None).next_chunk(1350);
        chunk.header.id = 1234;
        client_io.link.send(TransportId(1), WireVersion::V1, &chunk).unwrap();

        // 송신 측을 닫으면 수신 측 reader가 EOF로 끝남
        drop(client_io.link);
        tokio::time::timeout(TIMEOUT, closed_rx).await.unwrap().unwrap();
        server_io.reader.await.unwrap();

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].header.id, 1234);
        assert_eq!(received[0].payload.len(), 700);
    }

    #[tokio::test]
    async fn test_nonce_mismatch_fails() {
        let listener = DirectListener::bind(0, 1).await.unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], listener.port()));

        let server = tokio::spawn(async move { listener.accept(Uuid::new_v4(), TIMEOUT).await });
        let client = connect(addr, Uuid::new_v4(), TIMEOUT).await;

        assert!(matches!(server.await.unwrap(), Err(Error::NonceMismatch { .. })));
        assert!(client.is_err());
    }

    #[tokio::test]
    async fn test_bind_skips_taken_port() {
        let first = DirectListener::bind(0, 1).await.unwrap();
        let second = DirectListener::bind(first.port(), 5).await.unwrap();
        assert_ne!(first.port(), second.port());
    }

    #[test]
    fn test_nonce_chunk_carries_nonce() {
        let nonce = Uuid::new_v4();
        let body = nonce_chunk(nonce);
        assert_eq!(body.len(), crate::wire::V1_HEADER_SIZE);
        assert!(check_nonce(nonce, &body).is_ok());
        assert!(check_nonce(Uuid::new_v4(), &body).is_err());
    }
}
