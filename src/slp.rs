//! SLP 시그널링 메시지
//!
//! 세션 요청/종료, 직접 연결 협상에 쓰이는 텍스트 메시지.
//!
//! ```text
//! INVITE MSNMSGR:bob@example.com MSNSLP/1.0\r\n
//! To: <msnmsgr:bob@example.com>\r\n
//! From: <msnmsgr:alice@example.com>\r\n
//! ...
//! Content-Type: application/x-msnmsgr-sessionreqbody\r\n
//! Content-Length: 123\r\n
//! \r\n
//! EUF-GUID: {...}\r\n
//! ...\r\n
//! \r\n
//! \0
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use base64::Engine;
use uuid::Uuid;

use crate::wire::WireVersion;
use crate::{braced_guid, parse_braced_guid, SessionId};

/// 프로토콜 토큰
pub const SLP_VERSION: &str = "MSNSLP/1.0";

/// 바디 Content-Type
pub mod content_type {
    pub const NULL: &str = "null";
    pub const SESSION_REQUEST: &str = "application/x-msnmsgr-sessionreqbody";
    pub const SESSION_FAILURE: &str = "application/x-msnmsgr-session-failure-respbody";
    pub const SESSION_CLOSE: &str = "application/x-msnmsgr-sessionclosebody";
    pub const TRANSPORT_REQUEST: &str = "application/x-msnmsgr-transreqbody";
    pub const TRANSPORT_RESPONSE: &str = "application/x-msnmsgr-transrespbody";
}

/// 요청 메서드
pub mod method {
    pub const INVITE: &str = "INVITE";
    pub const BYE: &str = "BYE";
    pub const ACK: &str = "ACK";
}

/// 응답 상태 코드
pub mod status {
    pub const ACCEPTED: u16 = 200;
    pub const NOT_FOUND: u16 = 404;
    pub const ERROR: u16 = 500;
    pub const DECLINED: u16 = 603;
    pub const UNACCEPTABLE: u16 = 606;
}

/// 세션 종류별 EUF-GUID
pub mod euf_guid {
    pub const MSN_OBJECT: &str = "{A4268EEC-FEC5-49E5-95C3-F126696BDBF6}";
    pub const FILE_TRANSFER: &str = "{5D3E02AB-6190-11D3-BBBB-00C04F795683}";
    pub const MEDIA_RECEIVE_ONLY: &str = "{1C9AA97E-9C05-4583-A3BD-908A196F1E92}";
    pub const MEDIA_SESSION: &str = "{4BD96FC0-AB17-4425-A14A-439185962DC8}";
    pub const SHARE_PHOTO: &str = "{41D3E74E-04A2-4B37-96F8-08ACDB610874}";
    pub const ACTIVITY: &str = "{6A13AF9C-5308-4F35-923A-67E8DDA40C2F}";
}

/// 직접 연결 요청에 고정으로 실리는 네트워크 ID
const NET_ID: i64 = -1388627126;

const NAT_TRAV_MSG_TYPE: &str = "WLX-Nat-Trav-Msg-Direct-Connect-Req";

const DEFAULT_CONN_TYPE: &str = "Unknown-Connect";

/// SLP 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlpParseError {
    #[error("MSNSLP/1.0 메시지가 아님")]
    NotSlp,
    #[error("잘못된 시작 줄: {0}")]
    InvalidStartLine(String),
    #[error("헤더/바디 구분자 없음")]
    MissingSeparator,
    #[error("잘못된 헤더 줄: {0}")]
    InvalidHeaderLine(String),
    #[error("필수 헤더 누락 또는 형식 오류: {name}")]
    MissingHeader { name: &'static str },
}

/// 순서가 보존되는 헤더 집합
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 같은 이름이 있으면 그 자리에서 값만 교체, 없으면 끝에 추가
    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) {
        let name = name.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name)?.trim().parse().ok()
    }

    /// `Name: value` 줄 파싱, 빈 줄(또는 `\0`)에서 중단
    fn parse_lines(text: &str) -> Result<Self, SlpParseError> {
        let mut headers = Headers::new();
        for line in text.split("\r\n") {
            if line.trim().is_empty() || line == "\0" {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| SlpParseError::InvalidHeaderLine(line.to_string()))?;
            headers.set(name.trim_end(), value.trim_start());
        }
        Ok(headers)
    }

    fn write_to(&self, out: &mut String) {
        for (name, value) in &self.0 {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
    }
}

/// 모든 바디에 공통인 헤더
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyCommon {
    pub session_id: Option<SessionId>,
    pub s_channel_state: Option<u32>,
    pub capabilities_flags: Option<u32>,
}

impl BodyCommon {
    /// SChannelState 0, Capabilities-Flags 1
    pub fn standard(session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            s_channel_state: Some(0),
            capabilities_flags: Some(1),
        }
    }

    fn from_headers(headers: &Headers) -> Self {
        Self {
            session_id: headers.get_u32("SessionID"),
            s_channel_state: headers.get_u32("SChannelState"),
            capabilities_flags: headers.get_u32("Capabilities-Flags"),
        }
    }

    fn write(&self, headers: &mut Headers) {
        if let Some(session_id) = self.session_id {
            headers.set("SessionID", session_id);
        }
        if let Some(state) = self.s_channel_state {
            headers.set("SChannelState", state);
        }
        if let Some(flags) = self.capabilities_flags {
            headers.set("Capabilities-Flags", flags);
        }
    }
}

/// 세션 요청 (INVITE)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequestBody {
    pub common: BodyCommon,
    pub euf_guid: String,
    pub application_id: u32,
    pub context: Vec<u8>,
}

impl SessionRequestBody {
    pub fn new(
        euf_guid: impl Into<String>,
        application_id: u32,
        context: impl Into<Vec<u8>>,
        session_id: SessionId,
    ) -> Self {
        Self {
            common: BodyCommon::standard(Some(session_id)),
            euf_guid: euf_guid.into(),
            application_id,
            context: context.into(),
        }
    }
}

/// 세션 종료 응답 주체
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Accepted(Uuid),
    Declined(Uuid),
}

/// 세션 종료 (BYE)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCloseBody {
    pub common: BodyCommon,
    pub context: Option<Vec<u8>>,
    pub reason: Option<CloseReason>,
}

/// 직접 연결 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequestBody {
    pub common: BodyCommon,
    pub bridges: Vec<String>,
    pub conn_type: String,
    pub upnp: bool,
    pub firewall: bool,
    pub nonce: Option<Uuid>,
}

impl TransportRequestBody {
    /// 랜덤 Nonce로 요청 생성
    pub fn new(bridges: Vec<String>, conn_type: impl Into<String>, upnp: bool, firewall: bool) -> Self {
        Self {
            common: BodyCommon::default(),
            bridges,
            conn_type: conn_type.into(),
            upnp,
            firewall,
            nonce: Some(Uuid::new_v4()),
        }
    }
}

/// 직접 연결 응답
///
/// V2에서는 주소/포트 헤더의 이름과 값이 글자 단위로 뒤집혀 전송된다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponseBody {
    pub common: BodyCommon,
    pub bridge: Option<String>,
    pub listening: Option<bool>,
    pub nonce: Option<Uuid>,
    pub internal_ips: Vec<IpAddr>,
    pub internal_port: Option<u16>,
    pub external_ips: Vec<IpAddr>,
    pub external_port: Option<u16>,
    pub conn_type: String,
    pub version: WireVersion,
}

impl Default for TransportResponseBody {
    fn default() -> Self {
        Self {
            common: BodyCommon::default(),
            bridge: None,
            listening: None,
            nonce: None,
            internal_ips: Vec::new(),
            internal_port: None,
            external_ips: Vec::new(),
            external_port: None,
            conn_type: DEFAULT_CONN_TYPE.to_string(),
            version: WireVersion::V1,
        }
    }
}

const INTERNAL_ADDRS: &str = "IPv4Internal-Addrs";
const INTERNAL_PORT: &str = "IPv4Internal-Port";
const EXTERNAL_ADDRS: &str = "IPv4External-Addrs";
const EXTERNAL_PORT: &str = "IPv4External-Port";

fn reversed(text: &str) -> String {
    text.chars().rev().collect()
}

fn join_ips(ips: &[IpAddr]) -> String {
    ips.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(" ")
}

fn parse_ips(text: &str) -> Vec<IpAddr> {
    text.split_whitespace().filter_map(|ip| ip.parse().ok()).collect()
}

impl TransportResponseBody {
    /// 버전에 따라 이름/값을 뒤집어 기록
    fn set_versioned(&self, headers: &mut Headers, name: &str, value: String) {
        match self.version {
            WireVersion::V1 => headers.set(name, value),
            WireVersion::V2 => headers.set(reversed(name), reversed(&value)),
        }
    }

    fn get_versioned(headers: &Headers, name: &str, version: WireVersion) -> Option<String> {
        match version {
            WireVersion::V1 => headers.get(name).map(str::to_string),
            WireVersion::V2 => headers.get(&reversed(name)).map(reversed),
        }
    }

    fn from_headers(headers: &Headers) -> Self {
        let version = if [INTERNAL_ADDRS, INTERNAL_PORT, EXTERNAL_ADDRS, EXTERNAL_PORT]
            .iter()
            .any(|name| headers.contains(&reversed(name)))
        {
            WireVersion::V2
        } else {
            WireVersion::V1
        };
        let get = |name: &str| Self::get_versioned(headers, name, version);

        Self {
            common: BodyCommon::from_headers(headers),
            bridge: headers.get("Bridge").map(str::to_string),
            listening: headers
                .get("Listening")
                .map(|v| v.trim().eq_ignore_ascii_case("true")),
            nonce: headers.get("Nonce").and_then(parse_braced_guid),
            internal_ips: get(INTERNAL_ADDRS).map(|v| parse_ips(&v)).unwrap_or_default(),
            internal_port: get(INTERNAL_PORT).and_then(|v| v.trim().parse().ok()),
            external_ips: get(EXTERNAL_ADDRS).map(|v| parse_ips(&v)).unwrap_or_default(),
            external_port: get(EXTERNAL_PORT).and_then(|v| v.trim().parse().ok()),
            conn_type: headers
                .get("Conn-Type")
                .unwrap_or(DEFAULT_CONN_TYPE)
                .to_string(),
            version,
        }
    }
}

/// 타입이 지정된 SLP 바디
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlpBody {
    Null(BodyCommon),
    SessionRequest(SessionRequestBody),
    SessionClose(SessionCloseBody),
    SessionFailure(BodyCommon),
    TransportRequest(TransportRequestBody),
    TransportResponse(TransportResponseBody),
    /// 등록되지 않은 Content-Type
    Raw {
        content_type: String,
        headers: Headers,
    },
}

impl Default for SlpBody {
    fn default() -> Self {
        SlpBody::Null(BodyCommon::standard(None))
    }
}

fn encode_context(context: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(context)
}

/// 패딩이 빠진 컨텍스트도 허용
fn decode_context(text: &str) -> Option<Vec<u8>> {
    let text = text.trim().trim_end_matches('\0');
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(text.trim_end_matches('=')))
        .ok()
}

impl SlpBody {
    pub fn content_type(&self) -> &str {
        match self {
            SlpBody::Null(_) => content_type::NULL,
            SlpBody::SessionRequest(_) => content_type::SESSION_REQUEST,
            SlpBody::SessionClose(_) => content_type::SESSION_CLOSE,
            SlpBody::SessionFailure(_) => content_type::SESSION_FAILURE,
            SlpBody::TransportRequest(_) => content_type::TRANSPORT_REQUEST,
            SlpBody::TransportResponse(_) => content_type::TRANSPORT_RESPONSE,
            SlpBody::Raw { content_type, .. } => content_type,
        }
    }

    /// 바디의 SessionID (없으면 0)
    pub fn session_id(&self) -> SessionId {
        let common = match self {
            SlpBody::Null(common) | SlpBody::SessionFailure(common) => common,
            SlpBody::SessionRequest(body) => &body.common,
            SlpBody::SessionClose(body) => &body.common,
            SlpBody::TransportRequest(body) => &body.common,
            SlpBody::TransportResponse(body) => &body.common,
            SlpBody::Raw { headers, .. } => return headers.get_u32("SessionID").unwrap_or(0),
        };
        common.session_id.unwrap_or(0)
    }

    /// 바디 헤더 집합
    pub fn to_headers(&self) -> Headers {
        let mut headers = Headers::new();
        match self {
            SlpBody::Null(common) | SlpBody::SessionFailure(common) => common.write(&mut headers),
            SlpBody::SessionRequest(body) => {
                body.common.write(&mut headers);
                headers.set("EUF-GUID", &body.euf_guid);
                headers.set("AppID", body.application_id);
                headers.set("Context", encode_context(&body.context));
            }
            SlpBody::SessionClose(body) => {
                body.common.write(&mut headers);
                if let Some(context) = &body.context {
                    headers.set("Context", encode_context(context));
                }
                match body.reason {
                    Some(CloseReason::Accepted(guid)) => headers.set("AcceptedBy", braced_guid(&guid)),
                    Some(CloseReason::Declined(guid)) => headers.set("DeclinedBy", braced_guid(&guid)),
                    None => {}
                }
            }
            SlpBody::TransportRequest(body) => {
                body.common.write(&mut headers);
                headers.set("NetID", NET_ID);
                headers.set("Bridges", body.bridges.join(" "));
                headers.set("Conn-Type", &body.conn_type);
                headers.set("TCP-Conn-Type", &body.conn_type);
                headers.set("UPnPNat", body.upnp);
                headers.set("ICF", body.firewall);
                if let Some(nonce) = &body.nonce {
                    headers.set("Nonce", braced_guid(nonce));
                }
                headers.set("Nat-Trav-Msg-Type", NAT_TRAV_MSG_TYPE);
            }
            SlpBody::TransportResponse(body) => {
                body.common.write(&mut headers);
                if let Some(bridge) = &body.bridge {
                    headers.set("Bridge", bridge);
                }
                if let Some(listening) = body.listening {
                    headers.set("Listening", listening);
                }
                if let Some(nonce) = &body.nonce {
                    headers.set("Nonce", braced_guid(nonce));
                }
                if !body.internal_ips.is_empty() {
                    body.set_versioned(&mut headers, INTERNAL_ADDRS, join_ips(&body.internal_ips));
                }
                if let Some(port) = body.internal_port {
                    body.set_versioned(&mut headers, INTERNAL_PORT, port.to_string());
                }
                if !body.external_ips.is_empty() {
                    body.set_versioned(&mut headers, EXTERNAL_ADDRS, join_ips(&body.external_ips));
                }
                if let Some(port) = body.external_port {
                    body.set_versioned(&mut headers, EXTERNAL_PORT, port.to_string());
                }
                headers.set("Nat-Trav-Msg-Type", NAT_TRAV_MSG_TYPE);
                headers.set("Conn-Type", &body.conn_type);
                headers.set("TCP-Conn-Type", &body.conn_type);
                headers.set("IPv6-global", "");
            }
            SlpBody::Raw { headers: raw, .. } => return raw.clone(),
        }
        headers
    }

    /// 직렬화된 바디 (빈 줄 + NUL 종료)
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        self.to_headers().write_to(&mut text);
        text.push_str("\r\n\0");
        text
    }
}

/// Content-Type 문자열 -> 바디 생성자
pub type BodyConstructor = fn(&Headers) -> SlpBody;

/// 바디 타입 테이블 (시작 시 한 번 구성해 파서에 전달)
#[derive(Clone, Default)]
pub struct BodyRegistry {
    constructors: HashMap<String, BodyConstructor>,
}

impl fmt::Debug for BodyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

impl BodyRegistry {
    /// 빈 테이블 (모든 바디가 Raw로 파싱됨)
    pub fn empty() -> Self {
        Self::default()
    }

    /// 표준 바디 타입 등록
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(content_type::NULL, |headers| {
            SlpBody::Null(BodyCommon::from_headers(headers))
        });
        registry.register(content_type::SESSION_REQUEST, |headers| {
            SlpBody::SessionRequest(SessionRequestBody {
                common: BodyCommon::from_headers(headers),
                euf_guid: headers.get("EUF-GUID").unwrap_or_default().to_string(),
                application_id: headers.get_u32("AppID").unwrap_or(0),
                context: headers
                    .get("Context")
                    .and_then(decode_context)
                    .unwrap_or_default(),
            })
        });
        registry.register(content_type::SESSION_CLOSE, |headers| {
            let reason = match (headers.get("AcceptedBy"), headers.get("DeclinedBy")) {
                (Some(guid), _) => parse_braced_guid(guid).map(CloseReason::Accepted),
                (None, Some(guid)) => parse_braced_guid(guid).map(CloseReason::Declined),
                (None, None) => None,
            };
            SlpBody::SessionClose(SessionCloseBody {
                common: BodyCommon::from_headers(headers),
                context: headers.get("Context").and_then(decode_context),
                reason,
            })
        });
        registry.register(content_type::SESSION_FAILURE, |headers| {
            SlpBody::SessionFailure(BodyCommon::from_headers(headers))
        });
        registry.register(content_type::TRANSPORT_REQUEST, |headers| {
            SlpBody::TransportRequest(TransportRequestBody {
                common: BodyCommon::from_headers(headers),
                bridges: headers
                    .get("Bridges")
                    .map(|b| b.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                conn_type: headers
                    .get("Conn-Type")
                    .unwrap_or(DEFAULT_CONN_TYPE)
                    .to_string(),
                upnp: headers.get("UPnPNat").is_some_and(|v| v.eq_ignore_ascii_case("true")),
                firewall: headers.get("ICF").is_some_and(|v| v.eq_ignore_ascii_case("true")),
                nonce: headers.get("Nonce").and_then(parse_braced_guid),
            })
        });
        registry.register(content_type::TRANSPORT_RESPONSE, |headers| {
            SlpBody::TransportResponse(TransportResponseBody::from_headers(headers))
        });
        registry
    }

    pub fn register(&mut self, content_type: impl Into<String>, constructor: BodyConstructor) {
        self.constructors.insert(content_type.into(), constructor);
    }

    /// 바디 텍스트 파싱, 알 수 없는 타입은 Raw
    pub fn build(&self, content_type: &str, text: &str) -> Result<SlpBody, SlpParseError> {
        let text = text.trim_end_matches('\0');
        let headers = if text.is_empty() {
            Headers::new()
        } else {
            Headers::parse_lines(text)?
        };

        Ok(match self.constructors.get(content_type) {
            Some(constructor) => constructor(&headers),
            None => SlpBody::Raw {
                content_type: content_type.to_string(),
                headers,
            },
        })
    }
}

/// 시작 줄
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: String, resource: String },
    Response { status: u16, reason: Option<String> },
}

/// 상태 코드 기본 사유 문구
pub fn status_reason(status: u16) -> &'static str {
    match status {
        status::ACCEPTED => "OK",
        status::NOT_FOUND => "Not Found",
        status::ERROR => "Internal Error",
        status::DECLINED => "Decline",
        status::UNACCEPTABLE => "Unacceptable",
        _ => "Unknown",
    }
}

/// 메시지 헤더 구성 값
#[derive(Debug, Clone, Default)]
pub struct SlpParams {
    pub to: String,
    pub from: String,
    pub branch: Option<String>,
    pub cseq: u32,
    pub call_id: Option<String>,
    pub max_forwards: u32,
    pub on_behalf: Option<String>,
}

impl SlpParams {
    pub fn new(to: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            ..Default::default()
        }
    }
}

/// SLP 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlpMessage {
    pub start: StartLine,
    pub headers: Headers,
    pub body: SlpBody,
}

impl SlpMessage {
    fn with_params(start: StartLine, params: &SlpParams, body: SlpBody) -> Self {
        let mut headers = Headers::new();
        headers.set("To", format!("<msnmsgr:{}>", params.to));
        headers.set("From", format!("<msnmsgr:{}>", params.from));
        if let Some(branch) = &params.branch {
            headers.set("Via", format!("{}/TLP ;branch={}", SLP_VERSION, branch));
        }
        headers.set("CSeq", params.cseq);
        if let Some(call_id) = &params.call_id {
            headers.set("Call-ID", call_id);
        }
        headers.set("Max-Forwards", params.max_forwards);
        if let Some(on_behalf) = &params.on_behalf {
            headers.set("On-Behalf", on_behalf);
        }

        Self {
            start,
            headers,
            body,
        }
    }

    /// 요청 메시지 (리소스는 `MSNMSGR:<to>`)
    pub fn request(method: &str, params: &SlpParams, body: SlpBody) -> Self {
        let start = StartLine::Request {
            method: method.to_string(),
            resource: format!("MSNMSGR:{}", params.to),
        };
        Self::with_params(start, params, body)
    }

    /// 응답 메시지 (`reason`이 없으면 상태 코드 기본 문구)
    pub fn response(status: u16, reason: Option<&str>, params: &SlpParams, body: SlpBody) -> Self {
        let start = StartLine::Response {
            status,
            reason: reason.map(str::to_string),
        };
        Self::with_params(start, params, body)
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    pub fn method(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    fn address(&self, name: &str) -> Option<&str> {
        let value = self.headers.get(name)?;
        let (_, address) = value.split_once(':')?;
        address.strip_suffix('>')
    }

    pub fn to(&self) -> Option<&str> {
        self.address("To")
    }

    pub fn from(&self) -> Option<&str> {
        self.address("From")
    }

    pub fn cseq(&self) -> Option<u32> {
        self.headers.get_u32("CSeq")
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get("Call-ID")
    }

    /// Via 헤더의 branch 파라미터
    pub fn branch(&self) -> Option<&str> {
        let via = self.headers.get("Via")?;
        via.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            (key.trim() == "branch").then(|| value.trim())
        })
    }

    /// 블롭 페이로드로 쓸 바이트
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn from_bytes(data: &[u8], registry: &BodyRegistry) -> Result<Self, SlpParseError> {
        Self::parse(&String::from_utf8_lossy(data), registry)
    }

    /// 메시지 파싱 (To/From/CSeq 필수)
    pub fn parse(raw: &str, registry: &BodyRegistry) -> Result<Self, SlpParseError> {
        if !raw.contains(SLP_VERSION) {
            return Err(SlpParseError::NotSlp);
        }
        let (start_line, content) = raw.split_once("\r\n").ok_or(SlpParseError::NotSlp)?;

        let invalid = || SlpParseError::InvalidStartLine(start_line.to_string());
        let mut parts = start_line.split(' ').filter(|p| !p.is_empty());
        let first = parts.next().ok_or_else(invalid)?;
        let start = if first == SLP_VERSION {
            let status = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(invalid)?;
            let reason = parts.collect::<Vec<_>>().join(" ");
            StartLine::Response {
                status,
                reason: (!reason.is_empty()).then_some(reason),
            }
        } else {
            let resource = parts.next().ok_or_else(invalid)?;
            if !resource.contains(':') {
                return Err(invalid());
            }
            StartLine::Request {
                method: first.to_string(),
                resource: resource.to_string(),
            }
        };

        let (header_text, body_text) = content
            .split_once("\r\n\r\n")
            .ok_or(SlpParseError::MissingSeparator)?;
        let headers = Headers::parse_lines(header_text)?;
        let content_type = headers.get("Content-Type").unwrap_or(content_type::NULL);
        let body = registry.build(content_type, body_text)?;

        let message = Self {
            start,
            headers,
            body,
        };
        if message.to().is_none() {
            return Err(SlpParseError::MissingHeader { name: "To" });
        }
        if message.from().is_none() {
            return Err(SlpParseError::MissingHeader { name: "From" });
        }
        if message.cseq().is_none() {
            return Err(SlpParseError::MissingHeader { name: "CSeq" });
        }
        Ok(message)
    }
}

impl fmt::Display for SlpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            StartLine::Request { method, resource } => {
                write!(f, "{} {} {}\r\n", method, resource, SLP_VERSION)?
            }
            StartLine::Response { status, reason } => write!(
                f,
                "{} {} {}\r\n",
                SLP_VERSION,
                status,
                reason.as_deref().unwrap_or(status_reason(*status))
            )?,
        }

        // Content-Type/Length는 실제 바디로 다시 계산
        let body = self.body.to_text();
        let mut headers = self.headers.clone();
        headers.set("Content-Type", self.body.content_type());
        headers.set("Content-Length", body.len());

        let mut text = String::new();
        headers.write_to(&mut text);
        text.push_str("\r\n");
        text.push_str(&body);
        f.write_str(&text)
    }
}
