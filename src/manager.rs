//! 전송 매니저
//!
//! - 등록된 전송 중 첫 번째로 쌍을 맡는 전송 선택
//! - 세션별 데이터 블롭 조립, 블랙리스트 세션 무시
//! - 드레인 틱과 이벤트 채널

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::{Blob, Chunk};
use crate::direct::{self, DirectIo, DirectListener};
use crate::relay::{self, RelayLink};
use crate::slp::{BodyCommon, BodyRegistry, Headers, SlpMessage, TransportRequestBody, TransportResponseBody};
use crate::stats::TransferStats;
use crate::transport::{
    BlobCompletion, Carrier, Delivery, DrainOutcome, Link, Transport, TransportId, TransportKind,
};
use crate::wire::WireVersion;
use crate::{Config, EndpointId, Error, LocalEndpoint, PeerId, Result, SessionId};

/// 이벤트 수신 측
pub type EventReceiver = Receiver<TransportEvent>;

/// 청크 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDirection {
    Inbound,
    Outbound,
}

/// 세션 계층으로 보내는 이벤트
#[derive(Debug)]
pub enum TransportEvent {
    /// 조립이 끝난 블롭 (시그널링 블롭은 세션 ID 0)
    BlobReceived {
        peer: PeerId,
        endpoint: Option<EndpointId>,
        blob: Blob,
    },
    /// 송신 블롭 완료
    BlobSent(BlobCompletion),
    /// 청크 하나 송신/수신 (ACK 등 제어 청크 제외)
    ChunkTransferred {
        transport: TransportId,
        direction: ChunkDirection,
        chunk: Chunk,
    },
    /// NAT 탐지로 알게 된 주소
    AddressesDiscovered {
        local: SocketAddr,
        external: SocketAddr,
    },
    /// 등록 해제된 전송
    TransportClosed(TransportId),
}

/// 전송 매니저
pub struct TransportManager {
    /// 설정
    config: Config,

    /// 로컬 계정/엔드포인트
    local: LocalEndpoint,

    /// 릴레이 캐리어 (없으면 기본 전송으로 대체)
    relay_carrier: Option<Arc<dyn Carrier>>,

    /// 대역 외 시그널링 전송
    notification: Option<Arc<Transport>>,

    /// SLP 바디 생성자 테이블
    registry: BodyRegistry,

    /// 등록된 전송 (등록 순서 = 선택 순서)
    transports: RwLock<Vec<Arc<Transport>>>,

    /// 등록되지 않은 기본 전송 캐시
    defaults: DashMap<(PeerId, Option<EndpointId>), Arc<Transport>>,

    /// 세션 ID -> 조립 중인 데이터 블롭
    data_blobs: DashMap<SessionId, Blob>,

    /// 수신을 무시할 세션
    blacklist: DashSet<SessionId>,

    /// 직접 연결 reader/writer 태스크
    direct_tasks: DashMap<TransportId, (JoinHandle<()>, JoinHandle<()>)>,

    /// (로컬, 외부) 주소
    addresses: RwLock<Option<(SocketAddr, SocketAddr)>>,

    /// 이벤트 송신 측
    events: Sender<TransportEvent>,
}

impl TransportManager {
    /// 새 매니저 생성
    ///
    /// 알림 캐리어가 있으면 알림 전송을 등록한다.
    pub fn new(
        config: Config,
        local: LocalEndpoint,
        relay: Option<Arc<dyn Carrier>>,
        notification: Option<Arc<dyn Carrier>>,
    ) -> (Arc<Self>, EventReceiver) {
        let (tx, rx) = if config.event_channel_capacity > 0 {
            crossbeam_channel::bounded(config.event_channel_capacity)
        } else {
            crossbeam_channel::unbounded()
        };

        let notification = notification.map(|carrier| {
            Arc::new(Transport::new(
                TransportId::next(),
                local.account.clone(),
                None,
                Link::Notification(RelayLink::new(carrier, local.clone())),
                WireVersion::V2,
                config.notification_max_chunk_size,
            )
            .with_max_blob_size(config.max_blob_size))
        });
        let transports = notification.iter().cloned().collect();

        let manager = Arc::new(Self {
            config,
            local,
            relay_carrier: relay,
            notification,
            registry: BodyRegistry::standard(),
            transports: RwLock::new(transports),
            defaults: DashMap::new(),
            data_blobs: DashMap::new(),
            blacklist: DashSet::new(),
            direct_tasks: DashMap::new(),
            addresses: RwLock::new(None),
            events: tx,
        });
        (manager, rx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local(&self) -> &LocalEndpoint {
        &self.local
    }

    pub fn registry(&self) -> &BodyRegistry {
        &self.registry
    }

    fn emit(&self, event: TransportEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!("이벤트 채널 가득 참, 버림: {:?}", event),
            Err(TrySendError::Disconnected(_)) => debug!("이벤트 수신자 없음"),
        }
    }

    // ---- 레지스트리 ----

    /// 전송 등록
    pub fn register(&self, transport: Arc<Transport>) -> Result<()> {
        let mut transports = self.transports.write();
        if transports.iter().any(|t| t.id() == transport.id()) {
            return Err(Error::AlreadyRegistered { id: transport.id().0 });
        }

        info!(
            "{} {} 전송 등록: peer={}, endpoint={:?}",
            transport.id(),
            transport.name(),
            transport.peer(),
            transport.endpoint()
        );
        transports.push(transport);
        Ok(())
    }

    /// 전송 등록 해제 (큐는 비우지 않음)
    pub fn unregister(&self, id: TransportId) -> Option<Arc<Transport>> {
        let mut transports = self.transports.write();
        let index = transports.iter().position(|t| t.id() == id)?;
        let transport = transports.remove(index);
        info!("{} {} 전송 해제", id, transport.name());
        Some(transport)
    }

    /// 전송 닫기: 등록 해제 + 큐 폐기 + 직접 연결 태스크 중단
    pub fn close_transport(&self, id: TransportId) -> Option<Arc<Transport>> {
        let transport = self.unregister(id);
        if let Some((_, (reader, writer))) = self.direct_tasks.remove(&id) {
            reader.abort();
            writer.abort();
        }
        if let Some(transport) = &transport {
            transport.close();
            self.emit(TransportEvent::TransportClosed(id));
        }
        transport
    }

    /// 등록된 전송 스냅샷
    pub fn transports(&self) -> Vec<Arc<Transport>> {
        self.transports.read().clone()
    }

    pub fn transport(&self, id: TransportId) -> Option<Arc<Transport>> {
        self.transports.read().iter().find(|t| t.id() == id).cloned()
    }

    /// 릴레이 전송 생성 후 등록
    ///
    /// 엔드포인트를 알면 V2, 모르면 V1로 시작한다.
    pub fn create_relay_transport(&self, peer: PeerId, endpoint: Option<EndpointId>) -> Result<Arc<Transport>> {
        let carrier = self
            .relay_carrier
            .clone()
            .ok_or_else(|| Error::Carrier("릴레이 캐리어가 설정되지 않음".to_string()))?;
        let version = if endpoint.is_some() {
            WireVersion::V2
        } else {
            WireVersion::V1
        };

        let transport = Arc::new(Transport::new(
            TransportId::next(),
            peer,
            endpoint,
            Link::Relay(RelayLink::new(carrier, self.local.clone())),
            version,
            self.config.relay_max_chunk_size,
        )
        .with_max_blob_size(self.config.max_blob_size));
        self.register(transport.clone())?;
        Ok(transport)
    }

    /// 쌍을 맡을 전송 선택
    ///
    /// 등록 순서대로 첫 매칭. 없으면 릴레이 전송을 새로 만들고,
    /// 릴레이 캐리어도 없으면 등록되지 않은 기본 전송을 돌려준다.
    pub fn get_transport(&self, peer: &PeerId, endpoint: Option<EndpointId>, blob: &Blob) -> Arc<Transport> {
        let found = self
            .transports
            .read()
            .iter()
            .find(|t| t.can_send(peer, endpoint))
            .cloned();
        if let Some(transport) = found {
            return transport;
        }

        if self.relay_carrier.is_some() {
            match self.create_relay_transport(peer.clone(), endpoint) {
                Ok(transport) => return transport,
                Err(e) => warn!("릴레이 전송 생성 실패: {}", e),
            }
        }

        debug!(
            "기본 전송 사용: peer={}, session={}, {} bytes",
            peer,
            blob.session_id,
            blob.total_size()
        );
        self.defaults
            .entry((peer.clone(), endpoint))
            .or_insert_with(|| Arc::new(Transport::fallback(peer.clone(), endpoint)))
            .value()
            .clone()
    }

    // ---- 송신 ----

    fn dispatch(&self, transport: &Arc<Transport>, peer: PeerId, endpoint: Option<EndpointId>, blob: Blob) {
        // 타이머가 새로 켜졌으면 첫 청크는 바로 보냄
        if transport.send(peer, endpoint, blob) {
            self.drain_transport(transport);
        }
    }

    /// 데이터를 블롭으로 감싸 송신
    pub fn send_data(
        &self,
        peer: &PeerId,
        endpoint: Option<EndpointId>,
        application_id: u32,
        session_id: SessionId,
        data: &[u8],
    ) -> TransportId {
        let blob = Blob::outgoing(application_id, session_id, data, None);
        let transport = self.get_transport(peer, endpoint, &blob);
        self.dispatch(&transport, peer.clone(), endpoint, blob);
        transport.id()
    }

    /// SLP 메시지를 시그널링 블롭(세션 0)으로 송신
    pub fn send_slp_message(
        &self,
        peer: &PeerId,
        endpoint: Option<EndpointId>,
        application_id: u32,
        message: &SlpMessage,
    ) -> TransportId {
        debug!("SLP 송신 -> {}: {:?}", peer, message.start);
        self.send_data(peer, endpoint, application_id, 0, &message.to_bytes())
    }

    /// 알림 채널로 SLP 메시지 송신
    pub fn send_slp_message_out_of_band(
        &self,
        peer: &PeerId,
        endpoint: Option<EndpointId>,
        application_id: u32,
        message: &SlpMessage,
    ) -> Result<TransportId> {
        let transport = self
            .notification
            .clone()
            .ok_or_else(|| Error::Carrier("알림 캐리어가 설정되지 않음".to_string()))?;

        let blob = Blob::outgoing(application_id, 0, &message.to_bytes(), None);
        self.dispatch(&transport, peer.clone(), endpoint, blob);
        Ok(transport.id())
    }

    // ---- 세션 제어 ----

    /// 들어올 데이터 블롭의 크기를 미리 등록
    pub fn register_data_buffer(&self, session_id: SessionId, total_size: u64) {
        if self.data_blobs.contains_key(&session_id) {
            warn!("세션 {} 데이터 버퍼가 이미 있음", session_id);
            return;
        }
        self.data_blobs
            .insert(session_id, Blob::incoming(0, session_id, total_size, None));
    }

    /// 조립 중인 세션 수
    pub fn pending_sessions(&self) -> usize {
        self.data_blobs.len()
    }

    /// 세션 정리: 조립 중 블롭 제거, 모든 전송의 데이터 큐에서 제거
    pub fn cleanup(&self, session_id: SessionId) {
        self.data_blobs.remove(&session_id);
        let removed: usize = self
            .transports
            .read()
            .iter()
            .map(|t| t.cleanup(session_id))
            .sum();
        debug!("세션 {} 정리: 큐 항목 {}개 제거", session_id, removed);
    }

    pub fn add_to_blacklist(&self, session_id: SessionId) {
        self.blacklist.insert(session_id);
    }

    pub fn remove_from_blacklist(&self, session_id: SessionId) {
        self.blacklist.remove(&session_id);
    }

    pub fn is_blacklisted(&self, session_id: SessionId) -> bool {
        self.blacklist.contains(&session_id)
    }

    // ---- 수신 ----

    /// 릴레이 캐리어로 받은 메시지
    ///
    /// 처음 보는 (계정, 엔드포인트)면 릴레이 전송을 만든다.
    pub fn handle_relay_message(&self, sender: &PeerId, headers: &Headers, body: &[u8]) -> Result<()> {
        let Some(inbound) = relay::decode_message(&self.local, sender, headers, body)? else {
            return Ok(());
        };

        let existing = self
            .transports
            .read()
            .iter()
            .find(|t| t.kind() == TransportKind::Relay && t.can_send(&inbound.source, inbound.source_endpoint))
            .cloned();
        let transport = match existing {
            Some(transport) => transport,
            None => self.create_relay_transport(inbound.source.clone(), inbound.source_endpoint)?,
        };
        transport.set_version(inbound.version);

        self.process_chunk(&transport, &inbound.source, inbound.source_endpoint, inbound.chunk);
        Ok(())
    }

    /// 알림 채널로 받은 메시지
    pub fn handle_notification_message(&self, sender: &PeerId, headers: &Headers, body: &[u8]) -> Result<()> {
        let transport = self
            .notification
            .clone()
            .ok_or_else(|| Error::Carrier("알림 캐리어가 설정되지 않음".to_string()))?;
        let Some(inbound) = relay::decode_message(&self.local, sender, headers, body)? else {
            return Ok(());
        };

        self.process_chunk(&transport, &inbound.source, inbound.source_endpoint, inbound.chunk);
        Ok(())
    }

    /// 등록된 전송이 받은 청크
    pub fn receive_chunk(&self, id: TransportId, chunk: Chunk) -> Result<()> {
        let transport = self
            .transport(id)
            .ok_or(Error::TransportClosed { id: id.0 })?;
        let peer = transport.peer().clone();
        self.process_chunk(&transport, &peer, transport.endpoint(), chunk);
        Ok(())
    }

    fn process_chunk(&self, transport: &Arc<Transport>, peer: &PeerId, endpoint: Option<EndpointId>, chunk: Chunk) {
        let session_id = chunk.session_id();
        let blacklisted = session_id != 0 && !chunk.is_control() && self.is_blacklisted(session_id);

        if !blacklisted && !chunk.is_control() && !chunk.is_data_preparation() {
            self.emit(TransportEvent::ChunkTransferred {
                transport: transport.id(),
                direction: ChunkDirection::Inbound,
                chunk: chunk.clone(),
            });
        }

        let received = transport.receive(peer, endpoint, chunk);
        if let Some(completion) = received.acknowledged {
            self.emit(TransportEvent::BlobSent(completion));
        }

        match received.delivery {
            Delivery::None => {}
            Delivery::Signaling(blob) => {
                debug!("시그널링 블롭 수신: {} bytes", blob.total_size());
                self.emit(TransportEvent::BlobReceived {
                    peer: peer.clone(),
                    endpoint,
                    blob,
                });
            }
            Delivery::Data(chunk) => self.assemble_data(peer, endpoint, chunk),
        }

        if received.ack_armed {
            self.drain_transport(transport);
        }
    }

    fn assemble_data(&self, peer: &PeerId, endpoint: Option<EndpointId>, chunk: Chunk) {
        let session_id = chunk.session_id();
        if self.is_blacklisted(session_id) {
            debug!("블랙리스트 세션 {} 청크 무시", session_id);
            return;
        }
        if chunk.header.blob_size > self.config.max_blob_size && !self.data_blobs.contains_key(&session_id) {
            warn!(
                "세션 {} 블롭 크기 초과, 버림: {} > {}",
                session_id, chunk.header.blob_size, self.config.max_blob_size
            );
            return;
        }

        let complete = {
            let mut blob = self.data_blobs.entry(session_id).or_insert_with(|| {
                Blob::incoming(
                    chunk.application_id,
                    session_id,
                    chunk.header.blob_size,
                    Some(chunk.blob_id()),
                )
            });
            if blob.transferred() == 0 {
                blob.set_id(chunk.blob_id());
                blob.application_id = chunk.application_id;
            }
            blob.append_chunk(&chunk)
        };

        if !complete {
            return;
        }
        if let Some((_, blob)) = self.data_blobs.remove(&session_id) {
            info!("세션 {} 블롭 수신 완료: {} bytes", session_id, blob.total_size());
            self.emit(TransportEvent::BlobReceived {
                peer: peer.clone(),
                endpoint,
                blob,
            });
        }
    }

    /// SLP 블롭 파싱
    pub fn parse_slp(&self, blob: &Blob) -> Result<SlpMessage> {
        Ok(SlpMessage::from_bytes(blob.data(), &self.registry)?)
    }

    /// 참가자 퇴장: 해당 계정의 릴레이 전송을 닫음
    pub fn peer_left(&self, peer: &PeerId) -> usize {
        let ids: Vec<TransportId> = self
            .transports
            .read()
            .iter()
            .filter(|t| t.kind() == TransportKind::Relay && t.peer() == peer)
            .map(|t| t.id())
            .collect();
        for id in &ids {
            self.close_transport(*id);
        }
        ids.len()
    }

    // ---- 드레인 ----

    /// 드레인 한 번, 청크를 보냈으면 true
    fn drain_transport(&self, transport: &Arc<Transport>) -> bool {
        match transport.drain() {
            Ok(DrainOutcome::Sent { chunk, completed }) => {
                if !chunk.is_control() {
                    self.emit(TransportEvent::ChunkTransferred {
                        transport: transport.id(),
                        direction: ChunkDirection::Outbound,
                        chunk,
                    });
                }
                if let Some(completion) = completed {
                    self.emit(TransportEvent::BlobSent(completion));
                }
                true
            }
            Ok(DrainOutcome::Busy) | Ok(DrainOutcome::Idle) => false,
            Err(Error::TransportClosed { .. }) => {
                warn!("{} 닫힌 전송, 등록 해제", transport.id());
                self.close_transport(transport.id());
                false
            }
            Err(e) => {
                warn!("{} 청크 송신 실패: {}", transport.id(), e);
                false
            }
        }
    }

    /// 타이머가 켜진 전송마다 드레인 한 번, 보낸 청크 수 반환
    pub fn tick(&self) -> usize {
        let armed: Vec<Arc<Transport>> = self
            .transports
            .read()
            .iter()
            .filter(|t| t.is_armed())
            .cloned()
            .collect();
        armed.iter().filter(|t| self.drain_transport(t)).count()
    }

    /// 주기 드레인 태스크 (매니저가 해제되면 종료)
    pub fn spawn_drain_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.config.drain_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.tick();
            }
        })
    }

    // ---- 주소/브리지 ----

    /// NAT 탐지 결과 저장
    pub fn update_transport_addresses(&self, local: SocketAddr, external: SocketAddr) {
        info!("주소 갱신: local={}, external={}", local, external);
        *self.addresses.write() = Some((local, external));
        self.emit(TransportEvent::AddressesDiscovered { local, external });
    }

    /// (로컬, 외부) 주소
    pub fn local_candidates(&self) -> Option<(SocketAddr, SocketAddr)> {
        *self.addresses.read()
    }

    /// 연결 유형 분류
    pub fn conn_type(&self) -> &'static str {
        match self.local_candidates() {
            None => "Unknown-Connect",
            Some((local, external)) => match (local.ip() == external.ip(), local.port() == external.port()) {
                (true, true) => "Direct-Connect",
                (true, false) => "Port-Restrict-NAT",
                (false, true) => "IP-Restrict-NAT",
                (false, false) => "Symmetric-NAT",
            },
        }
    }

    /// 지원하는 브리지 이름
    pub fn supported_bridges(&self) -> Vec<String> {
        if self.config.direct_enabled {
            vec![TransportKind::Direct.protocol().to_string()]
        } else {
            Vec::new()
        }
    }

    /// 직접 연결 요청 바디
    pub fn transport_request(&self, session_id: SessionId) -> TransportRequestBody {
        let mut body = TransportRequestBody::new(self.supported_bridges(), self.conn_type(), false, false);
        body.common = BodyCommon::standard(Some(session_id));
        body
    }

    /// 직접 연결 요청에 대한 응답 바디
    ///
    /// 공통 브리지가 없으면 브리지 없는 응답(거절용)을 만든다.
    pub fn transport_response(
        &self,
        request: &TransportRequestBody,
        listening_port: Option<u16>,
        version: WireVersion,
    ) -> TransportResponseBody {
        let session_id = request.common.session_id;
        let bridge = self
            .supported_bridges()
            .into_iter()
            .find(|bridge| request.bridges.contains(bridge));
        let Some(bridge) = bridge else {
            debug!("공통 브리지 없음: {:?}", request.bridges);
            return TransportResponseBody {
                common: BodyCommon {
                    session_id,
                    ..Default::default()
                },
                version,
                ..Default::default()
            };
        };

        let (internal_ips, external_ips, external_port): (Vec<IpAddr>, Vec<IpAddr>, Option<u16>) =
            match self.local_candidates() {
                Some((local, external)) => (vec![local.ip()], vec![external.ip()], Some(external.port())),
                None => (Vec::new(), Vec::new(), None),
            };

        TransportResponseBody {
            common: BodyCommon::standard(session_id),
            bridge: Some(bridge),
            listening: Some(listening_port.is_some()),
            nonce: request.nonce,
            internal_ips,
            internal_port: listening_port,
            external_ips,
            external_port,
            conn_type: self.conn_type().to_string(),
            version,
        }
    }

    // ---- 직접 연결 ----

    /// 리스너 열기 (`direct_port`부터 시도)
    pub async fn listen_direct(&self) -> Result<DirectListener> {
        DirectListener::bind(self.config.direct_port, self.config.direct_listen_attempts).await
    }

    /// 상대 리스너에 연결해 직접 전송 등록
    pub async fn connect_direct(
        self: &Arc<Self>,
        peer: PeerId,
        endpoint: Option<EndpointId>,
        addr: SocketAddr,
        nonce: Uuid,
    ) -> Result<TransportId> {
        let stream = direct::connect(addr, nonce, self.config.direct_connect_timeout()).await?;
        self.attach_direct(peer, endpoint, stream)
    }

    /// 들어온 연결을 받아 직접 전송 등록
    pub async fn accept_direct(
        self: &Arc<Self>,
        listener: DirectListener,
        peer: PeerId,
        endpoint: Option<EndpointId>,
        nonce: Uuid,
    ) -> Result<TransportId> {
        let stream = listener
            .accept(nonce, self.config.direct_connect_timeout())
            .await?;
        self.attach_direct(peer, endpoint, stream)
    }

    /// 핸드셰이크가 끝난 스트림으로 직접 전송 등록
    pub fn attach_direct(
        self: &Arc<Self>,
        peer: PeerId,
        endpoint: Option<EndpointId>,
        stream: TcpStream,
    ) -> Result<TransportId> {
        let id = TransportId::next();
        let version = if endpoint.is_some() {
            WireVersion::V2
        } else {
            WireVersion::V1
        };

        let on_chunk = {
            let manager: Weak<Self> = Arc::downgrade(self);
            move |chunk: Chunk| {
                if let Some(manager) = manager.upgrade() {
                    if let Err(e) = manager.receive_chunk(id, chunk) {
                        debug!("{} 청크 전달 실패: {}", id, e);
                    }
                }
            }
        };
        let on_closed = {
            let manager: Weak<Self> = Arc::downgrade(self);
            move || {
                if let Some(manager) = manager.upgrade() {
                    manager.close_transport(id);
                }
            }
        };

        let DirectIo { link, reader, writer } = direct::spawn_io(stream, version, on_chunk, on_closed);
        let transport = Arc::new(Transport::new(
            id,
            peer,
            endpoint,
            Link::Direct(link),
            version,
            self.config.direct_max_chunk_size,
        )
        .with_max_blob_size(self.config.max_blob_size));

        self.direct_tasks.insert(id, (reader, writer));
        if let Err(e) = self.register(transport) {
            if let Some((_, (reader, writer))) = self.direct_tasks.remove(&id) {
                reader.abort();
                writer.abort();
            }
            return Err(e);
        }
        Ok(id)
    }

    // ---- 통계 ----

    /// 등록된 전송 통계 합산
    pub fn stats(&self) -> TransferStats {
        let mut total = TransferStats::default();
        for transport in self.transports.read().iter() {
            total.merge(&transport.stats());
        }
        total
    }

    pub fn stats_summary(&self) -> String {
        format!("transports={} {}", self.transports.read().len(), self.stats().summary())
    }
}
