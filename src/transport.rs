//! 전송 추상화
//!
//! - 제어 큐(ACK, 시그널링)는 항상 데이터 큐보다 먼저 비워짐
//! - 드레인 한 번에 청크 하나, 블롭을 모두 잘라낸 뒤에만 큐에서 제거
//! - 전송마다 독립적인 로컬 청크 ID 카운터와 대기 ACK/블롭 테이블

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::chunk::{Blob, Chunk};
use crate::config::DEFAULT_MAX_BLOB_SIZE;
use crate::direct::DirectLink;
use crate::relay::RelayLink;
use crate::slp::Headers;
use crate::stats::TransferStats;
use crate::wire::WireVersion;
use crate::{generate_id, EndpointId, PeerId, Result, SessionId};

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// 매니저 레지스트리에서 전송을 가리키는 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

impl TransportId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 전송 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// 공유 채팅 세션을 통한 릴레이
    Relay,
    /// 직접 TCP 연결
    Direct,
    /// 계정 제어 채널을 통한 단발성 시그널링
    Notification,
    /// 어떤 전송도 쌍을 맡지 않을 때의 no-op
    Default,
}

impl TransportKind {
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::Relay => "switchboard",
            TransportKind::Direct => "direct",
            TransportKind::Notification => "notification",
            TransportKind::Default => "default",
        }
    }

    pub fn protocol(self) -> &'static str {
        match self {
            TransportKind::Direct => "TCPv1",
            TransportKind::Relay => "SBBridge",
            TransportKind::Notification | TransportKind::Default => "None",
        }
    }

    /// 선호도 (선택 순서에는 쓰이지 않음)
    pub fn rating(self) -> u32 {
        match self {
            TransportKind::Direct => 1,
            _ => 0,
        }
    }
}

/// 캐리어 메시지 배달 확인 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Unacknowledged,
    Negative,
    Acknowledged,
    /// P2P 데이터용
    Data,
}

impl AckMode {
    pub fn as_char(self) -> char {
        match self {
            AckMode::Unacknowledged => 'U',
            AckMode::Negative => 'N',
            AckMode::Acknowledged => 'A',
            AckMode::Data => 'D',
        }
    }
}

/// 캐리어로 보내는 불투명 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierMessage {
    pub recipient: PeerId,
    pub content_type: String,
    pub headers: Headers,
    pub body: Bytes,
    pub ack_mode: AckMode,
}

/// 릴레이/알림 채널 협력자
///
/// 배달은 fire-and-forget, 즉시 실패만 에러로 돌려준다.
pub trait Carrier: Send + Sync {
    fn deliver(&self, message: CarrierMessage) -> Result<()>;
}

/// 물리 송신 수단
pub(crate) enum Link {
    Relay(RelayLink),
    Direct(DirectLink),
    Notification(RelayLink),
    Default,
}

impl Link {
    fn kind(&self) -> TransportKind {
        match self {
            Link::Relay(_) => TransportKind::Relay,
            Link::Direct(_) => TransportKind::Direct,
            Link::Notification(_) => TransportKind::Notification,
            Link::Default => TransportKind::Default,
        }
    }
}

/// 큐 항목
#[derive(Debug)]
enum QueueItem {
    Blob(Blob),
    Ack(Chunk),
}

#[derive(Debug)]
struct QueueEntry {
    peer: PeerId,
    endpoint: Option<EndpointId>,
    item: QueueItem,
}

impl QueueEntry {
    fn session_id(&self) -> SessionId {
        match &self.item {
            QueueItem::Blob(blob) => blob.session_id,
            QueueItem::Ack(chunk) => chunk.session_id(),
        }
    }
}

#[derive(Debug)]
struct SendQueues {
    control: VecDeque<QueueEntry>,
    data: VecDeque<QueueEntry>,
    local_chunk_id: u32,
}

#[derive(Debug, Default)]
struct PendingTables {
    /// ACK를 기다리는 청크 ID
    acks: HashSet<u32>,
    /// 마지막 청크의 ack_id -> 완료 보고
    blobs: HashMap<u32, BlobCompletion>,
    /// 블롭 ID -> 조립 중인 시그널링 블롭
    signaling: HashMap<u32, Blob>,
}

/// 블롭 송신 완료 보고
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobCompletion {
    pub peer: PeerId,
    pub endpoint: Option<EndpointId>,
    pub application_id: u32,
    pub session_id: SessionId,
    pub blob_id: u32,
    pub size: u64,
    /// NAK로 해소됨 (재전송 없음)
    pub nak: bool,
}

/// 드레인 결과
#[derive(Debug)]
pub enum DrainOutcome {
    /// 다른 드레인이 큐를 잡고 있음
    Busy,
    /// 두 큐 모두 비어 타이머 해제
    Idle,
    /// 청크 하나 송신
    Sent {
        chunk: Chunk,
        completed: Option<BlobCompletion>,
    },
}

/// 수신 청크 처리 후 전달할 내용
#[derive(Debug)]
pub enum Delivery {
    None,
    /// 전송 안에서 조립이 끝난 시그널링 블롭
    Signaling(Blob),
    /// 매니저가 조립할 데이터 청크
    Data(Chunk),
}

/// 수신 처리 결과
#[derive(Debug)]
pub struct Received {
    /// ACK/NAK로 해소된 블롭
    pub acknowledged: Option<BlobCompletion>,
    /// ACK 청크를 제어 큐에 넣었고 그로 인해 타이머가 새로 켜짐
    pub ack_armed: bool,
    pub delivery: Delivery,
}

/// 하나의 (피어, 엔드포인트) 쌍에 대한 전송
pub struct Transport {
    id: TransportId,
    peer: PeerId,
    endpoint: Option<EndpointId>,
    link: Link,
    version: RwLock<WireVersion>,
    max_chunk_size: usize,
    max_blob_size: u64,
    queues: Mutex<SendQueues>,
    pending: Mutex<PendingTables>,
    timer_armed: AtomicBool,
    stats: Mutex<TransferStats>,
}

impl Transport {
    pub(crate) fn new(
        id: TransportId,
        peer: PeerId,
        endpoint: Option<EndpointId>,
        link: Link,
        version: WireVersion,
        max_chunk_size: usize,
    ) -> Self {
        Self {
            id,
            peer,
            endpoint,
            link,
            version: RwLock::new(version),
            max_chunk_size,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            queues: Mutex::new(SendQueues {
                control: VecDeque::new(),
                data: VecDeque::new(),
                local_chunk_id: generate_id(),
            }),
            pending: Mutex::new(PendingTables::default()),
            timer_armed: AtomicBool::new(false),
            stats: Mutex::new(TransferStats::default()),
        }
    }

    /// 송신 수단 없는 기본 전송
    pub(crate) fn fallback(peer: PeerId, endpoint: Option<EndpointId>) -> Self {
        Self::new(TransportId::next(), peer, endpoint, Link::Default, WireVersion::V1, 0)
    }

    /// 수신 시그널링 블롭의 최대 선언 크기
    pub(crate) fn with_max_blob_size(mut self, max_blob_size: u64) -> Self {
        self.max_blob_size = max_blob_size;
        self
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn endpoint(&self) -> Option<EndpointId> {
        self.endpoint
    }

    pub fn kind(&self) -> TransportKind {
        self.link.kind()
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn rating(&self) -> u32 {
        self.kind().rating()
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn version(&self) -> WireVersion {
        *self.version.read()
    }

    pub(crate) fn set_version(&self, version: WireVersion) {
        *self.version.write() = version;
    }

    /// 드레인 타이머가 켜져 있는지
    pub fn is_armed(&self) -> bool {
        self.timer_armed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> TransferStats {
        self.stats.lock().clone()
    }

    /// 주어진 쌍을 이 전송이 맡을 수 있는지
    pub fn can_send(&self, peer: &PeerId, endpoint: Option<EndpointId>) -> bool {
        match self.kind() {
            // 알림 채널은 대역 외 경로로만 사용
            TransportKind::Notification => false,
            _ => self.peer == *peer && self.endpoint == endpoint,
        }
    }

    /// 대기 중인 (제어, 데이터) 항목 수
    pub fn queued(&self) -> (usize, usize) {
        let queues = self.queues.lock();
        (queues.control.len(), queues.data.len())
    }

    /// ACK 대기 중인 청크 수
    pub fn pending_acks(&self) -> usize {
        self.pending.lock().acks.len()
    }

    /// 블롭을 큐에 넣음, 타이머가 새로 켜졌으면 true
    ///
    /// 시그널링 블롭(세션 0)과 알림 전송의 블롭은 제어 큐로 간다.
    /// 최대 청크 크기가 0이면 기본 전송처럼 블롭을 흡수한다.
    pub fn send(&self, peer: PeerId, endpoint: Option<EndpointId>, blob: Blob) -> bool {
        if self.kind() != TransportKind::Default && self.max_chunk_size == 0 && blob.total_size() > 0 {
            warn!(
                "{} 최대 청크 크기가 0, 블롭 버림: session={}, {} bytes",
                self.id,
                blob.session_id,
                blob.total_size()
            );
            self.stats.lock().record_dropped();
            return false;
        }
        if self.kind() == TransportKind::Default {
            debug!(
                "{} 기본 전송이 블롭 흡수: peer={}, session={}, {} bytes",
                self.id,
                peer,
                blob.session_id,
                blob.total_size()
            );
            self.stats.lock().record_dropped();
            return false;
        }

        let control = blob.is_signaling() || self.kind() == TransportKind::Notification;
        self.enqueue(
            QueueEntry {
                peer,
                endpoint,
                item: QueueItem::Blob(blob),
            },
            control,
        )
    }

    fn send_ack(&self, peer: &PeerId, endpoint: Option<EndpointId>, ack: Chunk) -> bool {
        if self.kind() == TransportKind::Default {
            return false;
        }

        self.enqueue(
            QueueEntry {
                peer: peer.clone(),
                endpoint,
                item: QueueItem::Ack(ack),
            },
            true,
        )
    }

    fn enqueue(&self, entry: QueueEntry, control: bool) -> bool {
        {
            let mut queues = self.queues.lock();
            if control {
                queues.control.push_back(entry);
            } else {
                queues.data.push_back(entry);
            }
        }
        !self.timer_armed.swap(true, Ordering::AcqRel)
    }

    /// 세션의 데이터 큐 항목 제거 (제어 큐는 보존), 제거 개수 반환
    pub fn cleanup(&self, session_id: SessionId) -> usize {
        let mut queues = self.queues.lock();
        let before = queues.data.len();
        queues.data.retain(|entry| entry.session_id() != session_id);
        let removed = before - queues.data.len();
        if removed > 0 {
            debug!("{} 세션 {} 데이터 {}개 취소", self.id, session_id, removed);
        }
        removed
    }

    /// 전송 닫기: 큐와 대기 테이블을 비움 (남은 항목은 보내지 않음)
    pub fn close(&self) {
        let (control, data) = {
            let mut queues = self.queues.lock();
            let counts = (queues.control.len(), queues.data.len());
            queues.control.clear();
            queues.data.clear();
            counts
        };
        let signaling = {
            let mut pending = self.pending.lock();
            pending.acks.clear();
            pending.blobs.clear();
            let partial = pending.signaling.len();
            pending.signaling.clear();
            partial
        };
        self.timer_armed.store(false, Ordering::Release);
        debug!(
            "{} 닫힘: 제어 {}개, 데이터 {}개, 조립 중 시그널링 {}개 폐기",
            self.id, control, data, signaling
        );
    }

    /// 드레인 한 번: 가장 높은 우선순위 큐의 머리에서 청크 하나 송신
    pub fn drain(&self) -> Result<DrainOutcome> {
        let Some(mut queues) = self.queues.try_lock() else {
            return Ok(DrainOutcome::Busy);
        };

        let SendQueues {
            control,
            data,
            local_chunk_id,
        } = &mut *queues;
        let queue = if !control.is_empty() {
            control
        } else if !data.is_empty() {
            data
        } else {
            self.timer_armed.store(false, Ordering::Release);
            return Ok(DrainOutcome::Idle);
        };

        let Some(entry) = queue.front_mut() else {
            return Ok(DrainOutcome::Idle);
        };
        let (mut chunk, finished) = match &mut entry.item {
            QueueItem::Blob(blob) => {
                let chunk = blob.next_chunk(self.max_chunk_size);
                (chunk, blob.is_complete())
            }
            QueueItem::Ack(ack) => (ack.clone(), true),
        };
        chunk.header.id = *local_chunk_id;
        *local_chunk_id = chunk.next_id();
        let peer = entry.peer.clone();
        let endpoint = entry.endpoint;

        let retired = if finished { queue.pop_front() } else { None };
        drop(queues);

        let mut completed = None;
        let mut pending_blob = None;
        let blob_sent = matches!(
            retired,
            Some(QueueEntry {
                item: QueueItem::Blob(_),
                ..
            })
        );
        if let Some(QueueEntry {
            item: QueueItem::Blob(blob),
            ..
        }) = retired
        {
            let completion = BlobCompletion {
                peer: peer.clone(),
                endpoint,
                application_id: blob.application_id,
                session_id: blob.session_id,
                blob_id: chunk.blob_id(),
                size: blob.total_size(),
                nak: false,
            };
            if blob.is_signaling() {
                completed = Some(completion);
            } else {
                pending_blob = Some(completion);
            }
        }

        // ACK가 transmit 완료 전에 도착할 수 있음, 실패 시 되돌림
        let ack_id = chunk.ack_id();
        {
            let mut pending = self.pending.lock();
            if let Some(completion) = pending_blob {
                pending.blobs.insert(ack_id, completion);
            }
            if chunk.requires_ack() {
                pending.acks.insert(ack_id);
            }
        }

        if let Err(e) = self.transmit(&peer, endpoint, &chunk) {
            let mut pending = self.pending.lock();
            pending.blobs.remove(&ack_id);
            pending.acks.remove(&ack_id);
            return Err(e);
        }

        {
            let mut stats = self.stats.lock();
            stats.record_sent(chunk.size(), chunk.is_ack());
            if blob_sent {
                stats.record_blob_sent();
            }
        }
        debug!("{} >>> {}", self.id, chunk);

        Ok(DrainOutcome::Sent { chunk, completed })
    }

    fn transmit(&self, peer: &PeerId, endpoint: Option<EndpointId>, chunk: &Chunk) -> Result<()> {
        let version = self.version();
        match &self.link {
            Link::Relay(link) | Link::Notification(link) => link.send(peer, endpoint, version, chunk),
            Link::Direct(link) => link.send(self.id, version, chunk),
            Link::Default => Ok(()),
        }
    }

    /// `peer`가 보낸 청크 처리 (ACK는 `peer`에게 돌려보냄)
    pub fn receive(&self, peer: &PeerId, endpoint: Option<EndpointId>, chunk: Chunk) -> Received {
        self.stats.lock().record_received(chunk.size());
        debug!("{} <<< {}", self.id, chunk);

        let mut ack_armed = false;
        if chunk.requires_ack() {
            ack_armed = self.send_ack(peer, endpoint, chunk.create_ack());
        }

        let mut acknowledged = None;
        if chunk.is_ack() || chunk.is_nak() {
            let nak = chunk.is_nak();
            let acked_id = chunk.header.acked_id;
            {
                let mut pending = self.pending.lock();
                pending.acks.remove(&acked_id);
                acknowledged = pending.blobs.remove(&acked_id).map(|mut completion| {
                    completion.nak = nak;
                    completion
                });
            }
            self.stats.lock().record_acknowledged(nak);
            if nak {
                warn!("{} NAK 수신: acked_id={} (재전송 없음)", self.id, acked_id);
            }
        }

        let delivery = if chunk.is_control() {
            Delivery::None
        } else if chunk.is_data_preparation() {
            debug!("{} 데이터 준비 청크 무시", self.id);
            self.stats.lock().record_dropped();
            Delivery::None
        } else if chunk.is_signaling() {
            self.assemble_signaling(&chunk)
        } else {
            Delivery::Data(chunk)
        };

        Received {
            acknowledged,
            ack_armed,
            delivery,
        }
    }

    fn assemble_signaling(&self, chunk: &Chunk) -> Delivery {
        let mut pending = self.pending.lock();
        if chunk.header.blob_size > self.max_blob_size && !pending.signaling.contains_key(&chunk.blob_id()) {
            warn!(
                "{} 시그널링 블롭 크기 초과, 버림: {} > {}",
                self.id, chunk.header.blob_size, self.max_blob_size
            );
            self.stats.lock().record_dropped();
            return Delivery::None;
        }

        let blob = pending.signaling.entry(chunk.blob_id()).or_insert_with(|| {
            Blob::incoming(
                chunk.application_id,
                0,
                chunk.header.blob_size,
                Some(chunk.blob_id()),
            )
        });

        if blob.append_chunk(chunk) {
            match pending.signaling.remove(&chunk.blob_id()) {
                Some(blob) => Delivery::Signaling(blob),
                None => Delivery::None,
            }
        } else {
            Delivery::None
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("peer", &self.peer)
            .field("endpoint", &self.endpoint)
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chunk::ChunkFlags;
    use crate::{application_id, LocalEndpoint, MAX_CHUNK_ID};
    use std::sync::Arc;

    /// 캐리어 메시지를 기록하는 테스트 대역
    #[derive(Default)]
    pub(crate) struct RecordingCarrier {
        pub messages: Mutex<Vec<CarrierMessage>>,
    }

    impl RecordingCarrier {
        pub fn take(&self) -> Vec<CarrierMessage> {
            std::mem::take(&mut *self.messages.lock())
        }
    }

    impl Carrier for RecordingCarrier {
        fn deliver(&self, message: CarrierMessage) -> Result<()> {
            self.messages.lock().push(message);
            Ok(())
        }
    }

    /// 항상 실패하는 캐리어
    struct FailingCarrier;

    impl Carrier for FailingCarrier {
        fn deliver(&self, _message: CarrierMessage) -> Result<()> {
            Err(crate::Error::Carrier("연결 끊김".to_string()))
        }
    }

    pub(crate) fn local() -> LocalEndpoint {
        LocalEndpoint::new("alice@example.com", EndpointId::random())
    }

    fn relay_transport(carrier: &Arc<RecordingCarrier>, max_chunk_size: usize) -> Transport {
        let link = RelayLink::new(carrier.clone(), local());
        Transport::new(
            TransportId::next(),
            PeerId::from("bob@example.com"),
            None,
            Link::Relay(link),
            WireVersion::V1,
            max_chunk_size,
        )
    }

    fn sent_chunk(outcome: DrainOutcome) -> (Chunk, Option<BlobCompletion>) {
        match outcome {
            DrainOutcome::Sent { chunk, completed } => (chunk, completed),
            other => panic!("sent expected, got {:?}", other),
        }
    }

    fn bob() -> PeerId {
        PeerId::from("bob@example.com")
    }

    #[test]
    fn test_drain_splits_and_sequences_ids() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);

        let data = vec![7u8; 3000];
        assert!(transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 42, &data, None)));
        // 이미 켜진 타이머는 다시 켜지지 않음
        assert!(!transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 43, &[1], None)));

        let (first, _) = sent_chunk(transport.drain().unwrap());
        let (second, _) = sent_chunk(transport.drain().unwrap());
        let (third, completed) = sent_chunk(transport.drain().unwrap());

        assert_eq!(second.header.id, first.next_id());
        assert_eq!(third.header.id, second.next_id());
        assert_eq!(
            [first.header.offset, second.header.offset, third.header.offset],
            [0, 1250, 2500]
        );
        assert!(third.requires_ack());
        // 데이터 블롭은 ACK가 와야 완료
        assert!(completed.is_none());
        assert_eq!(transport.pending_acks(), 1);
        assert_eq!(transport.queued(), (0, 1));
        assert_eq!(carrier.take().len(), 3);
    }

    #[test]
    fn test_control_tier_drains_first() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);

        transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 9, &[1u8; 2000], None));
        transport.send(bob(), None, Blob::outgoing(0, 0, b"BYE", None));

        let (chunk, completed) = sent_chunk(transport.drain().unwrap());
        assert_eq!(chunk.session_id(), 0);
        assert_eq!(chunk.payload.as_ref(), b"BYE");
        // 시그널링 블롭은 큐에서 빠질 때 완료
        assert_eq!(completed.map(|c| c.size), Some(3));

        let (chunk, _) = sent_chunk(transport.drain().unwrap());
        assert_eq!(chunk.session_id(), 9);
    }

    #[test]
    fn test_cleanup_preserves_control_entries() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);

        transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 5, &[1; 10], None));
        transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 6, &[1; 10], None));
        transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 5, &[1; 10], None));
        transport.send(bob(), None, Blob::outgoing(0, 0, b"BYE session 5", None));
        // 세션 5에 대한 ACK도 제어 큐에 있음
        let mut inbound = Blob::outgoing(0, 5, &[2; 10], None).next_chunk(1250);
        inbound.header.id = 100;
        transport.receive(&bob(), None, inbound);

        assert_eq!(transport.cleanup(5), 2);
        assert_eq!(transport.queued(), (2, 1));
    }

    #[test]
    fn test_idle_drain_disarms_timer() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);

        transport.send(bob(), None, Blob::outgoing(0, 0, b"x", None));
        assert!(transport.is_armed());
        sent_chunk(transport.drain().unwrap());
        assert!(matches!(transport.drain().unwrap(), DrainOutcome::Idle));
        assert!(!transport.is_armed());
        assert!(transport.send(bob(), None, Blob::outgoing(0, 0, b"y", None)));
    }

    #[test]
    fn test_reentrant_drain_reports_busy() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);
        transport.send(bob(), None, Blob::outgoing(0, 0, b"x", None));

        let guard = transport.queues.lock();
        assert!(matches!(transport.drain().unwrap(), DrainOutcome::Busy));
        drop(guard);
        sent_chunk(transport.drain().unwrap());
    }

    #[test]
    fn test_ack_resolves_pending_blob() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);
        transport.send(bob(), None, Blob::outgoing(application_id::WEBCAM, 12, &[3u8; 500], None));
        let (chunk, _) = sent_chunk(transport.drain().unwrap());

        let mut ack = chunk.create_ack();
        ack.header.id = 555;
        let received = transport.receive(&bob(), None, ack);
        let completion = received.acknowledged.expect("completion");
        assert_eq!(completion.session_id, 12);
        assert_eq!(completion.size, 500);
        assert!(!completion.nak);
        assert_eq!(transport.pending_acks(), 0);
        assert!(matches!(received.delivery, Delivery::None));
    }

    #[test]
    fn test_nak_clears_without_retransmit() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);
        transport.send(bob(), None, Blob::outgoing(application_id::WEBCAM, 12, &[3u8; 500], None));
        let (chunk, _) = sent_chunk(transport.drain().unwrap());

        let mut nak = chunk.create_ack();
        nak.header.flags = ChunkFlags::NAK;
        let received = transport.receive(&bob(), None, nak);
        assert!(received.acknowledged.expect("completion").nak);
        assert_eq!(transport.pending_acks(), 0);
        assert_eq!(transport.queued(), (0, 0));
        assert!(matches!(transport.drain().unwrap(), DrainOutcome::Idle));
    }

    #[test]
    fn test_receive_acks_and_routes() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);

        // 두 조각 시그널링 블롭은 전송 안에서 조립
        let mut signaling = Blob::outgoing(0, 0, &[b'a'; 1500], Some(3333));
        let first = signaling.next_chunk(1000);
        let second = signaling.next_chunk(1000);
        assert!(matches!(transport.receive(&bob(), None, first).delivery, Delivery::None));
        let received = transport.receive(&bob(), None, second);
        assert!(received.ack_armed);
        match received.delivery {
            Delivery::Signaling(blob) => assert_eq!(blob.data(), &[b'a'; 1500][..]),
            other => panic!("signaling expected, got {:?}", other),
        }

        // 데이터 청크는 매니저로 전달
        let data = Blob::outgoing(application_id::FILE_TRANSFER, 8, &[1; 10], None).next_chunk(1250);
        assert!(matches!(transport.receive(&bob(), None, data).delivery, Delivery::Data(_)));

        // 데이터 준비 청크는 ACK만 하고 버림
        let prep = Blob::outgoing(application_id::DISPLAY_PICTURE_TRANSFER, 8, &[0; 4], None).next_chunk(1250);
        assert!(matches!(transport.receive(&bob(), None, prep).delivery, Delivery::None));

        // 제어 큐에 ACK 3개 (시그널링 마지막, 데이터, 준비)
        assert_eq!(transport.queued(), (3, 0));
        let (ack, _) = sent_chunk(transport.drain().unwrap());
        assert!(ack.is_ack());
    }

    #[test]
    fn test_local_id_wraps() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);
        transport.queues.lock().local_chunk_id = MAX_CHUNK_ID - 100;

        transport.send(bob(), None, Blob::outgoing(0, 0, &[0u8; 300], None));
        let (first, _) = sent_chunk(transport.drain().unwrap());
        assert_eq!(first.header.id, MAX_CHUNK_ID - 100);
        assert_eq!(transport.queues.lock().local_chunk_id, 200);
    }

    #[test]
    fn test_default_transport_absorbs() {
        let transport = Transport::fallback(bob(), None);
        assert_eq!(transport.kind(), TransportKind::Default);
        assert_eq!(transport.max_chunk_size(), 0);
        assert!(!transport.send(bob(), None, Blob::outgoing(0, 1, &[1; 10], None)));
        assert_eq!(transport.queued(), (0, 0));
        assert!(matches!(transport.drain().unwrap(), DrainOutcome::Idle));
        assert!(transport.can_send(&bob(), None));
        assert!(!transport.can_send(&bob(), Some(EndpointId::random())));
    }

    #[test]
    fn test_failed_transmit_leaves_nothing_pending() {
        let link = RelayLink::new(Arc::new(FailingCarrier), local());
        let transport = Transport::new(TransportId::next(), bob(), None, Link::Relay(link), WireVersion::V1, 1250);

        transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 4, &[1u8; 100], None));
        assert!(matches!(transport.drain(), Err(crate::Error::Carrier(_))));
        assert_eq!(transport.pending_acks(), 0);
        assert!(transport.pending.lock().blobs.is_empty());
        assert_eq!(transport.stats().blobs_sent, 0);
    }

    #[test]
    fn test_close_discards_partial_signaling() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250);

        let mut signaling = Blob::outgoing(0, 0, &[b'a'; 1500], Some(3334));
        transport.receive(&bob(), None, signaling.next_chunk(1000));
        transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 2, &[1; 10], None));
        assert_eq!(transport.pending.lock().signaling.len(), 1);

        transport.close();
        assert!(transport.pending.lock().signaling.is_empty());
        assert_eq!(transport.queued(), (0, 0));
        assert!(!transport.is_armed());
    }

    #[test]
    fn test_zero_chunk_size_absorbs() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 0);

        assert!(!transport.send(bob(), None, Blob::outgoing(application_id::FILE_TRANSFER, 3, &[1; 10], None)));
        assert_eq!(transport.queued(), (0, 0));
        assert!(matches!(transport.drain().unwrap(), DrainOutcome::Idle));
        assert!(carrier.take().is_empty());
    }

    #[test]
    fn test_oversized_signaling_blob_dropped() {
        let carrier = Arc::new(RecordingCarrier::default());
        let transport = relay_transport(&carrier, 1250).with_max_blob_size(1000);

        let mut signaling = Blob::outgoing(0, 0, &[b'a'; 1500], Some(3335));
        let first = signaling.next_chunk(1000);
        assert!(matches!(transport.receive(&bob(), None, first).delivery, Delivery::None));
        assert!(transport.pending.lock().signaling.is_empty());
    }
}
