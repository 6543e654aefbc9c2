//! 직접 연결 파일 전송 도구
//!
//! 한 쪽은 리슨해서 블롭 하나를 받고, 다른 쪽은 연결해서 파일을 보낸다.
//!
//! 사용법:
//!   cargo run --bin direct-transfer -- --listen [--port 6891] --out received.bin
//!   cargo run --bin direct-transfer -- --connect 127.0.0.1:6891 --nonce <GUID> --file data.bin

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use msnp2p::{
    application_id, braced_guid, generate_id, parse_braced_guid, Config, EndpointId, EventReceiver, LocalEndpoint,
    PeerId, TransportEvent, TransportManager,
};

const SENDER: &str = "sender@localhost";
const RECEIVER: &str = "receiver@localhost";

enum Mode {
    Listen { out: PathBuf },
    Connect { addr: SocketAddr, file: Option<PathBuf> },
}

/// 도구 설정
struct TransferConfig {
    mode: Mode,
    nonce: Option<Uuid>,
    wait: Duration,
    config: Config,
}

fn parse_args() -> TransferConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut transfer = TransferConfig {
        mode: Mode::Listen {
            out: PathBuf::from("received.bin"),
        },
        nonce: None,
        wait: Duration::from_secs(60),
        config: Config::default(),
    };
    let mut out = PathBuf::from("received.bin");
    let mut file = None;
    let mut connect = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--listen" | "-l" => connect = None,
            "--connect" | "-c" => {
                if i + 1 < args.len() {
                    connect = Some(args[i + 1].parse().expect("유효한 주소 필요"));
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    transfer.config.direct_port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--nonce" | "-n" => {
                if i + 1 < args.len() {
                    transfer.nonce = Some(parse_braced_guid(&args[i + 1]).expect("유효한 GUID 필요"));
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    file = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--out" | "-o" => {
                if i + 1 < args.len() {
                    out = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    transfer.config.direct_max_chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--wait" => {
                if i + 1 < args.len() {
                    transfer.wait = Duration::from_secs(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"direct-transfer - 직접 TCP 전송으로 블롭 하나 주고받기

사용법:
  cargo run --bin direct-transfer -- [OPTIONS]

옵션:
  -l, --listen            리슨해서 받기 (기본)
  -c, --connect <ADDR>    연결해서 보내기
  -p, --port <PORT>       리슨 시작 포트 (기본: 6891)
  -n, --nonce <GUID>      핸드셰이크 Nonce (리슨 쪽은 생략 시 생성)
  -f, --file <PATH>       보낼 파일 (생략 시 64KB 테스트 데이터)
  -o, --out <PATH>        받은 블롭 저장 경로 (기본: received.bin)
  --chunk-size <SIZE>     최대 청크 페이로드 (기본: 1350)
  --wait <SECS>           완료 대기 시간 (기본: 60)
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    transfer.mode = match connect {
        Some(addr) => Mode::Connect { addr, file },
        None => Mode::Listen { out },
    };
    transfer
}

/// 조건에 맞는 이벤트를 기다림 (이벤트 채널은 동기 채널이라 블로킹 스레드에서)
async fn wait_for<T, F>(events: EventReceiver, wait: Duration, mut pick: F) -> Option<T>
where
    T: Send + 'static,
    F: FnMut(TransportEvent) -> Option<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let deadline = std::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match events.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return Some(found);
                    }
                }
                Err(_) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let transfer = parse_args();
    let nonce = transfer.nonce.unwrap_or_else(Uuid::new_v4);

    match transfer.mode {
        Mode::Listen { out } => {
            let local = LocalEndpoint::new(RECEIVER, EndpointId::random());
            let (manager, events) = TransportManager::new(transfer.config, local, None, None);
            let _drain = manager.spawn_drain_loop();

            let listener = manager.listen_direct().await?;
            info!("리슨 포트: {}", listener.port());
            info!("Nonce: {}", braced_guid(&nonce));
            manager
                .accept_direct(listener, PeerId::from(SENDER), None, nonce)
                .await?;

            let blob = wait_for(events, transfer.wait, |event| match event {
                TransportEvent::BlobReceived { blob, .. } if blob.session_id != 0 => Some(blob),
                _ => None,
            })
            .await;

            match blob {
                Some(blob) => {
                    info!("블롭 수신: session={}, {} bytes", blob.session_id, blob.total_size());
                    std::fs::write(&out, blob.data())?;
                    info!("저장: {:?}", out);
                }
                None => warn!("대기 시간 안에 블롭을 받지 못함"),
            }

            // 마지막 ACK가 나갈 시간
            tokio::time::sleep(manager.config().drain_interval() * 2).await;
            info!("{}", manager.stats_summary());
        }

        Mode::Connect { addr, file } => {
            let Some(nonce) = transfer.nonce else {
                return Err("--connect에는 --nonce가 필요함".into());
            };
            let data = match &file {
                Some(path) => {
                    info!("파일 로드: {:?}", path);
                    std::fs::read(path)?
                }
                None => {
                    info!("테스트 데이터 사용 (64KB)");
                    vec![0xABu8; 64 * 1024]
                }
            };

            let local = LocalEndpoint::new(SENDER, EndpointId::random());
            let (manager, events) = TransportManager::new(transfer.config, local, None, None);
            let _drain = manager.spawn_drain_loop();

            let receiver = PeerId::from(RECEIVER);
            manager.connect_direct(receiver.clone(), None, addr, nonce).await?;

            let session_id = generate_id();
            let start = std::time::Instant::now();
            manager.send_data(&receiver, None, application_id::FILE_TRANSFER, session_id, &data);
            info!("전송 시작: session={}, {} bytes", session_id, data.len());

            let completion = wait_for(events, transfer.wait, move |event| match event {
                TransportEvent::BlobSent(completion) if completion.session_id == session_id => Some(completion),
                _ => None,
            })
            .await;

            match completion {
                Some(completion) if completion.nak => warn!("NAK 수신 (재전송 없음)"),
                Some(_) => {
                    let elapsed = start.elapsed().as_secs_f64();
                    info!("전송 완료: {:.2}s, {:.2} KB/s", elapsed, data.len() as f64 / elapsed / 1000.0);
                }
                None => warn!("대기 시간 안에 ACK를 받지 못함"),
            }
            info!("{}", manager.stats_summary());
        }
    }

    Ok(())
}
