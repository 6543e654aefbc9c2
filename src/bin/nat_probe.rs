//! NAT 탐지 도구
//!
//! 에코 서버로 외부 주소를 확인하고, 피어 주소가 주어지면 펀칭까지 시도한다.
//!
//! 사용법:
//!   cargo run --bin nat-probe -- [OPTIONS]
//!
//! 예시:
//!   # 외부 주소만 확인
//!   cargo run --bin nat-probe -- --echo 64.4.35.253:7001
//!
//!   # 펀칭 시도
//!   cargo run --bin nat-probe -- --peer 203.0.113.5:6891

use std::net::SocketAddr;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use msnp2p::{Config, EndpointId, LocalEndpoint, NatTraversal, PunchOutcome, TransportManager};

/// 도구 설정
struct ProbeConfig {
    peer: Option<SocketAddr>,
    verbose: bool,
    config: Config,
}

fn parse_args() -> ProbeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut probe = ProbeConfig {
        peer: None,
        verbose: false,
        config: Config::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--echo" | "-e" => {
                if i + 1 < args.len() {
                    probe.config.echo_server = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--peer" | "-p" => {
                if i + 1 < args.len() {
                    probe.peer = Some(args[i + 1].parse().expect("유효한 주소 필요"));
                    i += 1;
                }
            }
            "--timeout" => {
                if i + 1 < args.len() {
                    let ms: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    probe.config.echo_timeout_ms = ms;
                    probe.config.punch_timeout_ms = ms;
                    i += 1;
                }
            }
            "--verbose" | "-v" => probe.verbose = true,
            "--help" | "-h" => {
                println!(
                    r#"nat-probe - 에코 서버 기반 NAT 탐지

사용법:
  cargo run --bin nat-probe -- [OPTIONS]

옵션:
  -e, --echo <ADDR>       에코 서버 주소 (기본: 64.4.35.253:7001)
  -p, --peer <ADDR>       펀칭할 피어 주소 (없으면 탐지만)
  --timeout <MS>          에코/펀칭 타임아웃 밀리초 (기본: 5000)
  -v, --verbose           청크 단위 로그 출력
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    probe
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let probe = parse_args();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if probe.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("에코 서버: {}", probe.config.echo_server);
    let nat = NatTraversal::new(probe.config.clone());

    let Some(peer) = probe.peer else {
        let discovery = nat.discover().await?;
        println!("local    {}", discovery.local);
        println!("external {}", discovery.external);
        return Ok(());
    };

    let local = LocalEndpoint::new("probe@localhost", EndpointId::random());
    let (manager, _events) = TransportManager::new(probe.config, local, None, None);

    let outcome = nat.run(&manager, peer).await?;
    if let Some((local, external)) = manager.local_candidates() {
        println!("local    {}", local);
        println!("external {}", external);
        println!("conn     {}", manager.conn_type());
    }
    match outcome {
        PunchOutcome::Accepted(_, from) => println!("punch    accepted from {}", from),
        PunchOutcome::Punched(_) => println!("punch    connected to {}", peer),
        PunchOutcome::Conventional(_) => println!("punch    echo failed, conventional connection to {}", peer),
    }

    Ok(())
}
