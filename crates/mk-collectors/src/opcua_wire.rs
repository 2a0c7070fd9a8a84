//! Minimal OPC UA TCP (opc.tcp) client: SecurityPolicy#None only.
//!
//! Implements just enough of the binary protocol for attribute reads:
//! HEL/ACK, OpenSecureChannel, CreateSession/ActivateSession with an
//! anonymous token, and Read. Single-chunk messages only, which is
//! ample for reading a monitored-node list.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mk_model::ScalarValue;

use crate::CollectorError;

const SECURITY_POLICY_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
const RECEIVE_BUFFER: u32 = 65535;
const MAX_MESSAGE: u32 = 16 * 1024 * 1024;

// Binary type ids (Encoding_DefaultBinary).
const OPEN_SECURE_CHANNEL_REQUEST: u32 = 446;
const CREATE_SESSION_REQUEST: u32 = 461;
const ACTIVATE_SESSION_REQUEST: u32 = 467;
const READ_REQUEST: u32 = 631;
const ANONYMOUS_IDENTITY_TOKEN: u32 = 321;

/// Offset between the OPC UA epoch (1601) and Unix epoch, in seconds.
const EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// A parsed OPC UA node id from configuration, e.g. `ns=2;s=Line1.Temp`
/// or `i=2258`.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeId {
    Numeric { namespace: u16, id: u32 },
    Text { namespace: u16, id: String },
}

impl NodeId {
    pub fn parse(input: &str) -> Result<Self, CollectorError> {
        let mut namespace = 0u16;
        let mut rest = input;
        if let Some(stripped) = input.strip_prefix("ns=") {
            let (ns, tail) = stripped.split_once(';').ok_or_else(|| {
                CollectorError::Config(format!("node id {input:?} missing ';' after ns"))
            })?;
            namespace = ns
                .parse()
                .map_err(|_| CollectorError::Config(format!("bad namespace in {input:?}")))?;
            rest = tail;
        }
        if let Some(id) = rest.strip_prefix("i=") {
            let id = id
                .parse()
                .map_err(|_| CollectorError::Config(format!("bad numeric id in {input:?}")))?;
            Ok(NodeId::Numeric { namespace, id })
        } else if let Some(id) = rest.strip_prefix("s=") {
            Ok(NodeId::Text {
                namespace,
                id: id.to_string(),
            })
        } else {
            Err(CollectorError::Config(format!(
                "node id {input:?} must use i= or s= form"
            )))
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Numeric { namespace, id } => write!(f, "ns={namespace};i={id}"),
            NodeId::Text { namespace, id } => write!(f, "ns={namespace};s={id}"),
        }
    }
}

// ---- encoding helpers (OPC UA binary is little-endian) ----

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_f64(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_string(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(s) => {
            put_i32(buf, s.len() as i32);
            buf.extend_from_slice(s.as_bytes());
        }
        None => put_i32(buf, -1),
    }
}

fn put_bytestring(buf: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            put_i32(buf, bytes.len() as i32);
            buf.extend_from_slice(bytes);
        }
        None => put_i32(buf, -1),
    }
}

/// Four-byte NodeId encoding for ns-0 numeric type ids.
fn put_type_id(buf: &mut Vec<u8>, id: u32) {
    buf.push(0x01);
    buf.push(0);
    buf.extend_from_slice(&(id as u16).to_le_bytes());
}

fn put_node_id(buf: &mut Vec<u8>, node: &NodeId) {
    match node {
        NodeId::Numeric { namespace, id } => {
            if *namespace == 0 && *id <= 0xff {
                buf.push(0x00);
                buf.push(*id as u8);
            } else if *namespace <= 0xff && *id <= 0xffff {
                buf.push(0x01);
                buf.push(*namespace as u8);
                buf.extend_from_slice(&(*id as u16).to_le_bytes());
            } else {
                buf.push(0x02);
                buf.extend_from_slice(&namespace.to_le_bytes());
                buf.extend_from_slice(&id.to_le_bytes());
            }
        }
        NodeId::Text { namespace, id } => {
            buf.push(0x03);
            buf.extend_from_slice(&namespace.to_le_bytes());
            put_string(buf, Some(id));
        }
    }
}

fn ua_now() -> i64 {
    let now = Utc::now();
    (now.timestamp() + EPOCH_OFFSET_SECS) * 10_000_000 + (now.timestamp_subsec_nanos() / 100) as i64
}

fn put_request_header(buf: &mut Vec<u8>, auth_token: &[u8], request_handle: u32) {
    buf.extend_from_slice(auth_token); // already-encoded NodeId
    put_i64(buf, ua_now());
    put_u32(buf, request_handle);
    put_u32(buf, 0); // return diagnostics
    put_string(buf, None); // audit entry id
    put_u32(buf, 30_000); // timeout hint ms
    buf.push(0x00); // additional header NodeId (two-byte 0)
    buf.push(0x00);
    buf.push(0x00); // no body
}

// ---- decoding helpers ----

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CollectorError> {
        if self.pos + n > self.buf.len() {
            return Err(CollectorError::Protocol("truncated UA message".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CollectorError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CollectorError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CollectorError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, CollectorError> {
        Ok(self.u32()? as i32)
    }

    fn i64(&mut self) -> Result<i64, CollectorError> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(i64::from_le_bytes(bytes))
    }

    fn f64(&mut self) -> Result<f64, CollectorError> {
        Ok(f64::from_bits(self.i64()? as u64))
    }

    fn f32(&mut self) -> Result<f32, CollectorError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn string(&mut self) -> Result<Option<String>, CollectorError> {
        let len = self.i32()?;
        if len < 0 {
            return Ok(None);
        }
        let bytes = self.take(len as usize)?;
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn bytestring(&mut self) -> Result<Option<&'a [u8]>, CollectorError> {
        let len = self.i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.take(len as usize)?))
    }

    fn skip_node_id(&mut self) -> Result<(), CollectorError> {
        let encoding = self.u8()?;
        match encoding & 0x0f {
            0x00 => {
                self.u8()?;
            }
            0x01 => {
                self.take(3)?;
            }
            0x02 => {
                self.u16()?;
                self.u32()?;
            }
            0x03 => {
                self.u16()?;
                self.string()?;
            }
            0x04 => {
                self.u16()?;
                self.take(16)?;
            }
            0x05 => {
                self.u16()?;
                self.bytestring()?;
            }
            other => {
                return Err(CollectorError::Protocol(format!(
                    "unknown NodeId encoding {other:#04x}"
                )))
            }
        }
        Ok(())
    }

    /// Read a NodeId, returning its raw encoded bytes (for echoing the
    /// auth token back to the server).
    fn node_id_raw(&mut self) -> Result<Vec<u8>, CollectorError> {
        let start = self.pos;
        self.skip_node_id()?;
        Ok(self.buf[start..self.pos].to_vec())
    }

    fn skip_diagnostic_info(&mut self) -> Result<(), CollectorError> {
        let mask = self.u8()?;
        if mask & 0x01 != 0 {
            self.i32()?;
        }
        if mask & 0x02 != 0 {
            self.i32()?;
        }
        if mask & 0x04 != 0 {
            self.i32()?;
        }
        if mask & 0x08 != 0 {
            self.i32()?;
        }
        if mask & 0x10 != 0 {
            self.string()?;
        }
        if mask & 0x20 != 0 {
            self.u32()?;
        }
        if mask & 0x40 != 0 {
            self.skip_diagnostic_info()?;
        }
        Ok(())
    }

    /// ResponseHeader: returns the service result status code.
    fn response_header(&mut self) -> Result<u32, CollectorError> {
        self.i64()?; // timestamp
        self.u32()?; // request handle
        let service_result = self.u32()?;
        self.skip_diagnostic_info()?;
        let string_table = self.i32()?;
        for _ in 0..string_table.max(0) {
            self.string()?;
        }
        // Additional header: NodeId + encoding byte (+ optional body).
        self.skip_node_id()?;
        let encoding = self.u8()?;
        if encoding & 0x01 != 0 {
            self.bytestring()?;
        }
        Ok(service_result)
    }
}

/// One sampled value from a Read.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub value: Option<ScalarValue>,
    pub status: u32,
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// An established opc.tcp session.
pub struct OpcTcpSession {
    stream: TcpStream,
    timeout: Duration,
    channel_id: u32,
    token_id: u32,
    sequence: u32,
    request_id: u32,
    request_handle: u32,
    auth_token: Vec<u8>,
}

impl OpcTcpSession {
    /// Full handshake: HEL/ACK, OpenSecureChannel (None), CreateSession,
    /// ActivateSession (anonymous).
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self, CollectorError> {
        let authority = endpoint
            .strip_prefix("opc.tcp://")
            .ok_or_else(|| {
                CollectorError::Config(format!("endpoint {endpoint:?} is not opc.tcp://"))
            })?
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&authority))
            .await
            .map_err(|_| CollectorError::Timeout)??;

        let mut session = OpcTcpSession {
            stream,
            timeout,
            channel_id: 0,
            token_id: 0,
            sequence: 0,
            request_id: 0,
            request_handle: 0,
            // Null NodeId until CreateSession hands us the real token.
            auth_token: vec![0x00, 0x00],
        };
        session.hello(endpoint).await?;
        session.open_secure_channel().await?;
        session.create_session(endpoint).await?;
        session.activate_session().await?;
        Ok(session)
    }

    async fn send_raw(&mut self, frame: &[u8]) -> Result<(), CollectorError> {
        tokio::time::timeout(self.timeout, self.stream.write_all(frame))
            .await
            .map_err(|_| CollectorError::Timeout)??;
        Ok(())
    }

    /// Read one complete message, returning (type, payload after the
    /// 8-byte header).
    async fn recv_raw(&mut self) -> Result<([u8; 3], Vec<u8>), CollectorError> {
        let mut header = [0u8; 8];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut header))
            .await
            .map_err(|_| CollectorError::Timeout)??;
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if size < 8 || size > MAX_MESSAGE as usize {
            return Err(CollectorError::Protocol(format!(
                "implausible UA message size {size}"
            )));
        }
        let mut body = vec![0u8; size - 8];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut body))
            .await
            .map_err(|_| CollectorError::Timeout)??;
        if &header[..3] == b"ERR" {
            let mut cursor = Cursor::new(&body);
            let code = cursor.u32().unwrap_or(0);
            let reason = cursor.string().unwrap_or(None).unwrap_or_default();
            return Err(CollectorError::Protocol(format!(
                "server error {code:#010x}: {reason}"
            )));
        }
        Ok(([header[0], header[1], header[2]], body))
    }

    fn frame(msg_type: &[u8; 3], body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(body.len() + 8);
        frame.extend_from_slice(msg_type);
        frame.push(b'F');
        frame.extend_from_slice(&((body.len() + 8) as u32).to_le_bytes());
        frame.extend_from_slice(body);
        frame
    }

    async fn hello(&mut self, endpoint: &str) -> Result<(), CollectorError> {
        let mut body = Vec::new();
        put_u32(&mut body, 0); // protocol version
        put_u32(&mut body, RECEIVE_BUFFER);
        put_u32(&mut body, RECEIVE_BUFFER);
        put_u32(&mut body, MAX_MESSAGE);
        put_u32(&mut body, 1); // max chunk count
        put_string(&mut body, Some(endpoint));
        let frame = Self::frame(b"HEL", &body);
        self.send_raw(&frame).await?;

        let (msg_type, _ack) = self.recv_raw().await?;
        if &msg_type != b"ACK" {
            return Err(CollectorError::Protocol(format!(
                "expected ACK, got {}",
                String::from_utf8_lossy(&msg_type)
            )));
        }
        Ok(())
    }

    fn next_sequence(&mut self) -> (u32, u32) {
        self.sequence += 1;
        self.request_id += 1;
        (self.sequence, self.request_id)
    }

    async fn open_secure_channel(&mut self) -> Result<(), CollectorError> {
        let mut body = Vec::new();
        put_u32(&mut body, 0); // secure channel id (none yet)
        put_string(&mut body, Some(SECURITY_POLICY_NONE));
        put_bytestring(&mut body, None); // sender certificate
        put_bytestring(&mut body, None); // receiver thumbprint
        let (seq, req) = self.next_sequence();
        put_u32(&mut body, seq);
        put_u32(&mut body, req);
        put_type_id(&mut body, OPEN_SECURE_CHANNEL_REQUEST);
        let auth = self.auth_token.clone();
        self.request_handle += 1;
        put_request_header(&mut body, &auth, self.request_handle);
        put_u32(&mut body, 0); // client protocol version
        put_u32(&mut body, 0); // request type: issue
        put_u32(&mut body, 1); // security mode: none
        put_bytestring(&mut body, None); // client nonce
        put_u32(&mut body, 3_600_000); // requested lifetime

        let frame = Self::frame(b"OPN", &body);
        self.send_raw(&frame).await?;

        let (msg_type, payload) = self.recv_raw().await?;
        if &msg_type != b"OPN" {
            return Err(CollectorError::Protocol(format!(
                "expected OPN response, got {}",
                String::from_utf8_lossy(&msg_type)
            )));
        }
        let mut cursor = Cursor::new(&payload);
        let _channel_id = cursor.u32()?;
        cursor.string()?; // security policy
        cursor.bytestring()?; // sender certificate
        cursor.bytestring()?; // receiver thumbprint
        cursor.u32()?; // sequence
        cursor.u32()?; // request id
        cursor.skip_node_id()?; // type id
        let service_result = cursor.response_header()?;
        if service_result != 0 {
            return Err(CollectorError::Protocol(format!(
                "OpenSecureChannel failed: {service_result:#010x}"
            )));
        }
        cursor.u32()?; // server protocol version
        self.channel_id = cursor.u32()?;
        self.token_id = cursor.u32()?;
        Ok(())
    }

    /// Send a service request in a MSG chunk and return the body cursor
    /// positioned after the type id.
    async fn service_call(&mut self, type_id: u32, request_body: &[u8]) -> Result<Vec<u8>, CollectorError> {
        let mut body = Vec::new();
        put_u32(&mut body, self.channel_id);
        put_u32(&mut body, self.token_id);
        let (seq, req) = self.next_sequence();
        put_u32(&mut body, seq);
        put_u32(&mut body, req);
        put_type_id(&mut body, type_id);
        body.extend_from_slice(request_body);

        let frame = Self::frame(b"MSG", &body);
        self.send_raw(&frame).await?;

        let (msg_type, payload) = self.recv_raw().await?;
        if &msg_type != b"MSG" {
            return Err(CollectorError::Protocol(format!(
                "expected MSG response, got {}",
                String::from_utf8_lossy(&msg_type)
            )));
        }
        let mut cursor = Cursor::new(&payload);
        cursor.u32()?; // channel id
        cursor.u32()?; // token id
        cursor.u32()?; // sequence
        cursor.u32()?; // request id
        cursor.skip_node_id()?; // response type id
        Ok(payload[cursor.pos..].to_vec())
    }

    async fn create_session(&mut self, endpoint: &str) -> Result<(), CollectorError> {
        let auth = self.auth_token.clone();
        self.request_handle += 1;
        let mut body = Vec::new();
        put_request_header(&mut body, &auth, self.request_handle);
        // Client application description.
        put_string(&mut body, Some("urn:murakumo:opcua-collector"));
        put_string(&mut body, Some("urn:murakumo"));
        body.push(0x02); // LocalizedText: text only
        put_string(&mut body, Some("murakumo"));
        put_u32(&mut body, 1); // application type: client
        put_string(&mut body, None); // gateway server uri
        put_string(&mut body, None); // discovery profile uri
        put_i32(&mut body, 0); // discovery urls: empty array
        put_string(&mut body, None); // server uri
        put_string(&mut body, Some(endpoint));
        put_string(&mut body, Some("murakumo-session"));
        put_bytestring(&mut body, Some(&[0u8; 32])); // client nonce
        put_bytestring(&mut body, None); // client certificate
        put_f64(&mut body, 3_600_000.0); // requested session timeout
        put_u32(&mut body, MAX_MESSAGE); // max response size

        let response = self.service_call(CREATE_SESSION_REQUEST, &body).await?;
        let mut cursor = Cursor::new(&response);
        let service_result = cursor.response_header()?;
        if service_result != 0 {
            return Err(CollectorError::Protocol(format!(
                "CreateSession failed: {service_result:#010x}"
            )));
        }
        cursor.skip_node_id()?; // session id
        self.auth_token = cursor.node_id_raw()?;
        Ok(())
    }

    async fn activate_session(&mut self) -> Result<(), CollectorError> {
        let auth = self.auth_token.clone();
        self.request_handle += 1;
        let mut body = Vec::new();
        put_request_header(&mut body, &auth, self.request_handle);
        put_string(&mut body, None); // client signature algorithm
        put_bytestring(&mut body, None); // client signature
        put_i32(&mut body, 0); // client software certificates
        put_i32(&mut body, 0); // locale ids
        // Anonymous identity token as an extension object.
        put_type_id(&mut body, ANONYMOUS_IDENTITY_TOKEN);
        body.push(0x01); // body is a bytestring
        let mut token = Vec::new();
        put_string(&mut token, Some("anonymous")); // policy id
        put_bytestring(&mut body, Some(&token));
        put_string(&mut body, None); // user token signature algorithm
        put_bytestring(&mut body, None); // user token signature

        let response = self.service_call(ACTIVATE_SESSION_REQUEST, &body).await?;
        let mut cursor = Cursor::new(&response);
        let service_result = cursor.response_header()?;
        if service_result != 0 {
            return Err(CollectorError::Protocol(format!(
                "ActivateSession failed: {service_result:#010x}"
            )));
        }
        Ok(())
    }

    /// Read the Value attribute of each node.
    pub async fn read_values(&mut self, nodes: &[NodeId]) -> Result<Vec<ReadResult>, CollectorError> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let auth = self.auth_token.clone();
        self.request_handle += 1;
        let mut body = Vec::new();
        put_request_header(&mut body, &auth, self.request_handle);
        put_f64(&mut body, 0.0); // max age
        put_u32(&mut body, 0); // timestamps to return: source
        put_i32(&mut body, nodes.len() as i32);
        for node in nodes {
            put_node_id(&mut body, node);
            put_u32(&mut body, 13); // attribute: Value
            put_string(&mut body, None); // index range
            body.extend_from_slice(&0u16.to_le_bytes()); // qualified name: ns 0
            put_i32(&mut body, -1); // null name
        }

        let response = self.service_call(READ_REQUEST, &body).await?;
        let mut cursor = Cursor::new(&response);
        let service_result = cursor.response_header()?;
        if service_result != 0 {
            return Err(CollectorError::Protocol(format!(
                "Read failed: {service_result:#010x}"
            )));
        }
        let count = cursor.i32()?;
        let mut results = Vec::new();
        for _ in 0..count.max(0) {
            results.push(read_data_value(&mut cursor)?);
        }
        Ok(results)
    }
}

fn read_data_value(cursor: &mut Cursor<'_>) -> Result<ReadResult, CollectorError> {
    let mask = cursor.u8()?;
    let value = if mask & 0x01 != 0 {
        Some(read_variant(cursor)?)
    } else {
        None
    };
    let status = if mask & 0x02 != 0 { cursor.u32()? } else { 0 };
    let source_timestamp = if mask & 0x04 != 0 {
        Some(ua_time_to_utc(cursor.i64()?))
    } else {
        None
    };
    if mask & 0x08 != 0 {
        cursor.i64()?; // server timestamp
    }
    if mask & 0x10 != 0 {
        cursor.u16()?; // source picoseconds
    }
    if mask & 0x20 != 0 {
        cursor.u16()?; // server picoseconds
    }
    Ok(ReadResult {
        value,
        status,
        source_timestamp,
    })
}

fn read_variant(cursor: &mut Cursor<'_>) -> Result<ScalarValue, CollectorError> {
    let encoding = cursor.u8()?;
    if encoding & 0x80 != 0 {
        return Err(CollectorError::Unsupported(
            "array variants are not sampled".to_string(),
        ));
    }
    let value = match encoding & 0x3f {
        1 => ScalarValue::Bool(cursor.u8()? != 0),
        2 => ScalarValue::Int(cursor.u8()? as i8 as i64),
        3 => ScalarValue::Int(cursor.u8()? as i64),
        4 => ScalarValue::Int(cursor.u16()? as i16 as i64),
        5 => ScalarValue::Int(cursor.u16()? as i64),
        6 => ScalarValue::Int(cursor.i32()? as i64),
        7 => ScalarValue::Int(cursor.u32()? as i64),
        8 => ScalarValue::Int(cursor.i64()?),
        9 => ScalarValue::Int(cursor.i64()?), // u64 clamped into i64 range
        10 => ScalarValue::Float(cursor.f32()? as f64),
        11 => ScalarValue::Float(cursor.f64()?),
        12 => ScalarValue::Text(cursor.string()?.unwrap_or_default()),
        13 => ScalarValue::Text(ua_time_to_utc(cursor.i64()?).to_rfc3339()),
        other => {
            return Err(CollectorError::Unsupported(format!(
                "variant type {other} is not sampled"
            )))
        }
    };
    Ok(value)
}

fn ua_time_to_utc(value: i64) -> DateTime<Utc> {
    let unix_secs = value / 10_000_000 - EPOCH_OFFSET_SECS;
    let nanos = (value % 10_000_000) * 100;
    Utc.timestamp_opt(unix_secs, nanos as u32)
        .single()
        .unwrap_or_else(Utc::now)
}
