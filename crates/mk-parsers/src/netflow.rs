//! NetFlow v5/v9 datagram parsing and 5-tuple aggregation.
//!
//! v5 is a fixed 48-byte record format. v9 is template-based: data
//! flowsets can only be decoded once the matching template has arrived,
//! so undecodable flowsets are handed back to the collector for
//! buffering.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Duration, Utc};

use mk_model::{FlowRecord, Port};

use crate::ParseError;

const V5_HEADER_LEN: usize = 24;
const V5_RECORD_LEN: usize = 48;
const V9_HEADER_LEN: usize = 20;

// v9 field types we decode (RFC 3954 §8).
const FT_IN_BYTES: u16 = 1;
const FT_IN_PKTS: u16 = 2;
const FT_PROTOCOL: u16 = 4;
const FT_SRC_TOS: u16 = 5;
const FT_TCP_FLAGS: u16 = 6;
const FT_L4_SRC_PORT: u16 = 7;
const FT_IPV4_SRC_ADDR: u16 = 8;
const FT_L4_DST_PORT: u16 = 11;
const FT_IPV4_DST_ADDR: u16 = 12;
const FT_LAST_SWITCHED: u16 = 21;
const FT_FIRST_SWITCHED: u16 = 22;

/// Destination-port table for industrial protocol recognition.
pub fn industrial_protocol_for_port(port: u16) -> Option<&'static str> {
    match port {
        502 => Some("Modbus"),
        102 => Some("S7comm"),
        2404 => Some("IEC-104"),
        4840 => Some("OPC-UA"),
        20000 => Some("DNP3"),
        44818 | 2222 => Some("EtherNet/IP"),
        47808 => Some("BACnet"),
        34962..=34964 => Some("PROFINET"),
        18245 | 18246 => Some("GE-SRTP"),
        5094 => Some("HART-IP"),
        5007 => Some("SuiteLink"),
        1089..=1091 => Some("Foundation Fieldbus HSE"),
        1883 | 8883 => Some("MQTT"),
        _ => None,
    }
}

/// Key of a v9 template: templates are scoped to (exporter, source id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub exporter: Ipv4Addr,
    pub source_id: u32,
    pub template_id: u16,
}

/// A v9 template definition.
#[derive(Debug, Clone)]
pub struct Template {
    fields: Vec<(u16, u16)>,
    record_len: usize,
}

/// Cache of v9 templates.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: HashMap<TemplateKey, Template>,
}

impl TemplateCache {
    pub fn new() -> Self {
        TemplateCache::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn contains(&self, key: &TemplateKey) -> bool {
        self.templates.contains_key(key)
    }
}

/// A data flowset that arrived before its template.
#[derive(Debug, Clone)]
pub struct UnresolvedFlowset {
    pub key: TemplateKey,
    pub data: Vec<u8>,
    /// Header context needed to decode once the template shows up.
    pub sys_uptime_ms: u32,
    pub unix_secs: u32,
    pub received_at: DateTime<Utc>,
}

/// Result of parsing one datagram.
#[derive(Debug, Default)]
pub struct NetflowParse {
    pub version: u16,
    pub flows: Vec<FlowRecord>,
    pub unresolved: Vec<UnresolvedFlowset>,
    pub templates_learned: usize,
    /// Flows dropped for failing validation (port 0 and friends).
    pub dropped_invalid: usize,
}

fn be_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn be_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Convert a sysUpTime-relative millisecond stamp to wall-clock time.
fn switched_to_utc(unix_secs: u32, sys_uptime_ms: u32, switched_ms: u32) -> DateTime<Utc> {
    let export = DateTime::<Utc>::from_timestamp(unix_secs as i64, 0).unwrap_or_else(Utc::now);
    let delta_ms = sys_uptime_ms.wrapping_sub(switched_ms) as i64;
    export - Duration::milliseconds(delta_ms)
}

/// Parse one NetFlow datagram. The version is detected from the header.
pub fn parse_datagram(
    exporter: Ipv4Addr,
    buf: &[u8],
    templates: &mut TemplateCache,
    now: DateTime<Utc>,
) -> Result<NetflowParse, ParseError> {
    if buf.len() < 2 {
        return Err(ParseError::Truncated("datagram shorter than 2 bytes".into()));
    }
    match be_u16(buf, 0) {
        5 => parse_v5(buf),
        9 => parse_v9(exporter, buf, templates, now),
        other => Err(ParseError::BadVersion(other)),
    }
}

fn parse_v5(buf: &[u8]) -> Result<NetflowParse, ParseError> {
    if buf.len() < V5_HEADER_LEN {
        return Err(ParseError::Truncated("v5 header".into()));
    }
    let count = be_u16(buf, 2) as usize;
    let sys_uptime = be_u32(buf, 4);
    let unix_secs = be_u32(buf, 8);

    let needed = V5_HEADER_LEN + count * V5_RECORD_LEN;
    if buf.len() < needed {
        return Err(ParseError::Truncated(format!(
            "v5 datagram claims {count} records, has {} bytes",
            buf.len()
        )));
    }

    let mut parse = NetflowParse {
        version: 5,
        ..Default::default()
    };
    for i in 0..count {
        let off = V5_HEADER_LEN + i * V5_RECORD_LEN;
        let rec = &buf[off..off + V5_RECORD_LEN];
        let src_ip = Ipv4Addr::from(be_u32(rec, 0));
        let dst_ip = Ipv4Addr::from(be_u32(rec, 4));
        let packets = be_u32(rec, 16) as u64;
        let bytes = be_u32(rec, 20) as u64;
        let first = be_u32(rec, 24);
        let last = be_u32(rec, 28);
        let src_port = be_u16(rec, 32);
        let dst_port = be_u16(rec, 34);
        let tcp_flags = rec[37];
        let protocol = rec[38];
        let tos = rec[39];

        match build_flow(
            src_ip, dst_ip, src_port, dst_port, protocol, bytes, packets,
            switched_to_utc(unix_secs, sys_uptime, first),
            switched_to_utc(unix_secs, sys_uptime, last),
            Some(tcp_flags),
            Some(tos),
        ) {
            Some(flow) => parse.flows.push(flow),
            None => parse.dropped_invalid += 1,
        }
    }
    Ok(parse)
}

fn parse_v9(
    exporter: Ipv4Addr,
    buf: &[u8],
    templates: &mut TemplateCache,
    now: DateTime<Utc>,
) -> Result<NetflowParse, ParseError> {
    if buf.len() < V9_HEADER_LEN {
        return Err(ParseError::Truncated("v9 header".into()));
    }
    let sys_uptime = be_u32(buf, 4);
    let unix_secs = be_u32(buf, 8);
    let source_id = be_u32(buf, 16);

    let mut parse = NetflowParse {
        version: 9,
        ..Default::default()
    };

    let mut off = V9_HEADER_LEN;
    while off + 4 <= buf.len() {
        let set_id = be_u16(buf, off);
        let set_len = be_u16(buf, off + 2) as usize;
        if set_len < 4 || off + set_len > buf.len() {
            return Err(ParseError::Truncated(format!(
                "flowset at {off} claims {set_len} bytes"
            )));
        }
        let body = &buf[off + 4..off + set_len];
        match set_id {
            0 => parse.templates_learned += parse_template_set(exporter, source_id, body, templates)?,
            1 => { /* options templates carry no flow data */ }
            2..=255 => {
                log::debug!("skipping reserved flowset id {set_id}");
            }
            template_id => {
                let key = TemplateKey {
                    exporter,
                    source_id,
                    template_id,
                };
                match templates.templates.get(&key) {
                    Some(template) => decode_data_set(
                        template, body, sys_uptime, unix_secs, &mut parse,
                    ),
                    None => parse.unresolved.push(UnresolvedFlowset {
                        key,
                        data: body.to_vec(),
                        sys_uptime_ms: sys_uptime,
                        unix_secs,
                        received_at: now,
                    }),
                }
            }
        }
        off += set_len;
    }
    Ok(parse)
}

fn parse_template_set(
    exporter: Ipv4Addr,
    source_id: u32,
    body: &[u8],
    templates: &mut TemplateCache,
) -> Result<usize, ParseError> {
    let mut learned = 0;
    let mut off = 0;
    while off + 4 <= body.len() {
        let template_id = be_u16(body, off);
        let field_count = be_u16(body, off + 2) as usize;
        off += 4;
        if off + field_count * 4 > body.len() {
            return Err(ParseError::Truncated("template field list".into()));
        }
        let mut fields = Vec::with_capacity(field_count);
        let mut record_len = 0usize;
        for i in 0..field_count {
            let ftype = be_u16(body, off + i * 4);
            let flen = be_u16(body, off + i * 4 + 2);
            record_len += flen as usize;
            fields.push((ftype, flen));
        }
        off += field_count * 4;
        if record_len == 0 {
            continue;
        }
        templates.templates.insert(
            TemplateKey {
                exporter,
                source_id,
                template_id,
            },
            Template { fields, record_len },
        );
        learned += 1;
    }
    Ok(learned)
}

fn read_field_u64(data: &[u8]) -> u64 {
    let mut value = 0u64;
    for &b in data.iter().take(8) {
        value = (value << 8) | b as u64;
    }
    value
}

fn decode_data_set(
    template: &Template,
    body: &[u8],
    sys_uptime: u32,
    unix_secs: u32,
    parse: &mut NetflowParse,
) {
    let mut off = 0;
    // Trailing bytes shorter than a record are padding.
    while off + template.record_len <= body.len() {
        let mut src_ip = None;
        let mut dst_ip = None;
        let mut src_port = 0u16;
        let mut dst_port = 0u16;
        let mut protocol = 0u8;
        let mut bytes = 0u64;
        let mut packets = 0u64;
        let mut first = 0u32;
        let mut last = 0u32;
        let mut tcp_flags = None;
        let mut tos = None;

        let mut field_off = off;
        for &(ftype, flen) in &template.fields {
            let data = &body[field_off..field_off + flen as usize];
            match ftype {
                FT_IPV4_SRC_ADDR if flen == 4 => {
                    src_ip = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]));
                }
                FT_IPV4_DST_ADDR if flen == 4 => {
                    dst_ip = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]));
                }
                FT_L4_SRC_PORT => src_port = read_field_u64(data) as u16,
                FT_L4_DST_PORT => dst_port = read_field_u64(data) as u16,
                FT_PROTOCOL => protocol = read_field_u64(data) as u8,
                FT_IN_BYTES => bytes = read_field_u64(data),
                FT_IN_PKTS => packets = read_field_u64(data),
                FT_FIRST_SWITCHED => first = read_field_u64(data) as u32,
                FT_LAST_SWITCHED => last = read_field_u64(data) as u32,
                FT_TCP_FLAGS => tcp_flags = Some(read_field_u64(data) as u8),
                FT_SRC_TOS => tos = Some(read_field_u64(data) as u8),
                _ => {}
            }
            field_off += flen as usize;
        }
        off += template.record_len;

        let (src_ip, dst_ip) = match (src_ip, dst_ip) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                parse.dropped_invalid += 1;
                continue;
            }
        };
        match build_flow(
            src_ip, dst_ip, src_port, dst_port, protocol, bytes, packets,
            switched_to_utc(unix_secs, sys_uptime, first),
            switched_to_utc(unix_secs, sys_uptime, last),
            tcp_flags,
            tos,
        ) {
            Some(flow) => parse.flows.push(flow),
            None => parse.dropped_invalid += 1,
        }
    }
}

/// Decode a previously buffered flowset once its template has arrived.
pub fn decode_unresolved(
    unresolved: &UnresolvedFlowset,
    templates: &TemplateCache,
) -> Option<Vec<FlowRecord>> {
    let template = templates.templates.get(&unresolved.key)?;
    let mut parse = NetflowParse::default();
    decode_data_set(
        template,
        &unresolved.data,
        unresolved.sys_uptime_ms,
        unresolved.unix_secs,
        &mut parse,
    );
    Some(parse.flows)
}

#[allow(clippy::too_many_arguments)]
fn build_flow(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    protocol: u8,
    bytes: u64,
    packets: u64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tcp_flags: Option<u8>,
    tos: Option<u8>,
) -> Option<FlowRecord> {
    let src_port = Port::new(src_port as u32).ok()?;
    let dst_port = Port::new(dst_port as u32).ok()?;
    let industrial = industrial_protocol_for_port(dst_port.get());
    Some(FlowRecord {
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol,
        bytes,
        packets,
        start,
        end,
        tcp_flags,
        tos,
        is_industrial: industrial.is_some(),
        industrial_protocol: industrial.map(String::from),
    })
}

/// 5-tuple key for aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlowKey {
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    protocol: u8,
}

/// Aggregates flows over a window keyed by 5-tuple: bytes and packets
/// sum, the time range extends. The collector drains on its window tick.
#[derive(Debug, Default)]
pub struct FlowAggregator {
    flows: HashMap<FlowKey, FlowRecord>,
}

impl FlowAggregator {
    pub fn new() -> Self {
        FlowAggregator::default()
    }

    pub fn push(&mut self, flow: FlowRecord) {
        let key = FlowKey {
            src_ip: flow.src_ip,
            dst_ip: flow.dst_ip,
            src_port: flow.src_port.get(),
            dst_port: flow.dst_port.get(),
            protocol: flow.protocol,
        };
        match self.flows.get_mut(&key) {
            Some(existing) => {
                existing.bytes += flow.bytes;
                existing.packets += flow.packets;
                if flow.start < existing.start {
                    existing.start = flow.start;
                }
                if flow.end > existing.end {
                    existing.end = flow.end;
                }
                if existing.tcp_flags.is_none() {
                    existing.tcp_flags = flow.tcp_flags;
                }
            }
            None => {
                self.flows.insert(key, flow);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Drain everything aggregated so far.
    pub fn drain(&mut self) -> Vec<FlowRecord> {
        self.flows.drain().map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v5_datagram(records: &[(u32, u32, u16, u16, u8, u32, u32)]) -> Vec<u8> {
        // (src, dst, sport, dport, proto, packets, bytes)
        let mut buf = Vec::new();
        buf.extend_from_slice(&5u16.to_be_bytes());
        buf.extend_from_slice(&(records.len() as u16).to_be_bytes());
        buf.extend_from_slice(&100_000u32.to_be_bytes()); // sys_uptime
        buf.extend_from_slice(&1_700_000_000u32.to_be_bytes()); // unix_secs
        buf.extend_from_slice(&0u32.to_be_bytes()); // unix_nsecs
        buf.extend_from_slice(&1u32.to_be_bytes()); // flow_sequence
        buf.extend_from_slice(&[0, 0, 0, 0]); // engine type/id, sampling

        for &(src, dst, sport, dport, proto, packets, bytes) in records {
            buf.extend_from_slice(&src.to_be_bytes());
            buf.extend_from_slice(&dst.to_be_bytes());
            buf.extend_from_slice(&0u32.to_be_bytes()); // nexthop
            buf.extend_from_slice(&0u16.to_be_bytes()); // input
            buf.extend_from_slice(&0u16.to_be_bytes()); // output
            buf.extend_from_slice(&packets.to_be_bytes());
            buf.extend_from_slice(&bytes.to_be_bytes());
            buf.extend_from_slice(&50_000u32.to_be_bytes()); // first
            buf.extend_from_slice(&60_000u32.to_be_bytes()); // last
            buf.extend_from_slice(&sport.to_be_bytes());
            buf.extend_from_slice(&dport.to_be_bytes());
            buf.push(0); // pad
            buf.push(0x18); // tcp flags
            buf.push(proto);
            buf.push(0); // tos
            buf.extend_from_slice(&[0; 8]); // AS numbers, masks, pad
        }
        buf
    }

    fn exporter() -> Ipv4Addr {
        "192.0.2.1".parse().unwrap()
    }

    #[test]
    fn test_v5_parse() {
        let buf = v5_datagram(&[(
            u32::from(Ipv4Addr::new(10, 0, 1, 50)),
            u32::from(Ipv4Addr::new(10, 0, 2, 10)),
            49152,
            502,
            6,
            10,
            1200,
        )]);
        let mut cache = TemplateCache::new();
        let parse = parse_datagram(exporter(), &buf, &mut cache, Utc::now()).unwrap();
        assert_eq!(parse.version, 5);
        assert_eq!(parse.flows.len(), 1);
        let flow = &parse.flows[0];
        assert_eq!(flow.dst_port.get(), 502);
        assert_eq!(flow.bytes, 1200);
        assert_eq!(flow.packets, 10);
        assert!(flow.is_industrial);
        assert_eq!(flow.industrial_protocol.as_deref(), Some("Modbus"));
        assert!(flow.start <= flow.end);
    }

    #[test]
    fn test_v5_port_zero_dropped() {
        let buf = v5_datagram(&[(1, 2, 0, 80, 6, 1, 100)]);
        let mut cache = TemplateCache::new();
        let parse = parse_datagram(exporter(), &buf, &mut cache, Utc::now()).unwrap();
        assert!(parse.flows.is_empty());
        assert_eq!(parse.dropped_invalid, 1);
    }

    #[test]
    fn test_v5_truncated_rejected() {
        let mut buf = v5_datagram(&[(1, 2, 10, 80, 6, 1, 100)]);
        buf.truncate(buf.len() - 10);
        let mut cache = TemplateCache::new();
        assert!(parse_datagram(exporter(), &buf, &mut cache, Utc::now()).is_err());
    }

    fn v9_template_datagram() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&9u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes()); // count
        buf.extend_from_slice(&100_000u32.to_be_bytes());
        buf.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes()); // sequence
        buf.extend_from_slice(&7u32.to_be_bytes()); // source id

        // Template flowset: id 256, fields: src addr, dst addr, sport,
        // dport, proto, bytes, pkts.
        let fields: &[(u16, u16)] = &[
            (FT_IPV4_SRC_ADDR, 4),
            (FT_IPV4_DST_ADDR, 4),
            (FT_L4_SRC_PORT, 2),
            (FT_L4_DST_PORT, 2),
            (FT_PROTOCOL, 1),
            (FT_IN_BYTES, 4),
            (FT_IN_PKTS, 4),
        ];
        let set_len = 4 + 4 + fields.len() * 4;
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&(set_len as u16).to_be_bytes());
        buf.extend_from_slice(&256u16.to_be_bytes());
        buf.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for &(t, l) in fields {
            buf.extend_from_slice(&t.to_be_bytes());
            buf.extend_from_slice(&l.to_be_bytes());
        }
        buf
    }

    fn v9_data_datagram() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&9u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&100_000u32.to_be_bytes());
        buf.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&7u32.to_be_bytes());

        let record_len = 4 + 4 + 2 + 2 + 1 + 4 + 4;
        let set_len = 4 + record_len;
        buf.extend_from_slice(&256u16.to_be_bytes());
        buf.extend_from_slice(&(set_len as u16).to_be_bytes());
        buf.extend_from_slice(&[10, 0, 1, 50]);
        buf.extend_from_slice(&[172, 16, 1, 10]);
        buf.extend_from_slice(&49152u16.to_be_bytes());
        buf.extend_from_slice(&4840u16.to_be_bytes());
        buf.push(6);
        buf.extend_from_slice(&2000u32.to_be_bytes());
        buf.extend_from_slice(&20u32.to_be_bytes());
        buf
    }

    #[test]
    fn test_v9_template_then_data() {
        let mut cache = TemplateCache::new();
        let now = Utc::now();

        let t = parse_datagram(exporter(), &v9_template_datagram(), &mut cache, now).unwrap();
        assert_eq!(t.templates_learned, 1);
        assert_eq!(cache.len(), 1);

        let d = parse_datagram(exporter(), &v9_data_datagram(), &mut cache, now).unwrap();
        assert_eq!(d.flows.len(), 1);
        let flow = &d.flows[0];
        assert_eq!(flow.dst_port.get(), 4840);
        assert_eq!(flow.bytes, 2000);
        assert_eq!(flow.industrial_protocol.as_deref(), Some("OPC-UA"));
    }

    #[test]
    fn test_v9_data_before_template_buffered() {
        let mut cache = TemplateCache::new();
        let now = Utc::now();

        let d = parse_datagram(exporter(), &v9_data_datagram(), &mut cache, now).unwrap();
        assert!(d.flows.is_empty());
        assert_eq!(d.unresolved.len(), 1);

        // Template arrives; the buffered flowset becomes decodable.
        parse_datagram(exporter(), &v9_template_datagram(), &mut cache, now).unwrap();
        let flows = decode_unresolved(&d.unresolved[0], &cache).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].bytes, 2000);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut cache = TemplateCache::new();
        let buf = [0u8, 7, 0, 0];
        assert!(matches!(
            parse_datagram(exporter(), &buf, &mut cache, Utc::now()),
            Err(ParseError::BadVersion(7))
        ));
    }

    #[test]
    fn test_aggregation_preserves_totals() {
        let mut cache = TemplateCache::new();
        let buf = v5_datagram(&[
            (1, 2, 1000, 502, 6, 10, 1200),
            (1, 2, 1000, 502, 6, 5, 800),
            (1, 2, 1000, 80, 6, 3, 300),
        ]);
        let parse = parse_datagram(exporter(), &buf, &mut cache, Utc::now()).unwrap();
        let pre_bytes: u64 = parse.flows.iter().map(|f| f.bytes).sum();
        let pre_packets: u64 = parse.flows.iter().map(|f| f.packets).sum();

        let mut agg = FlowAggregator::new();
        for flow in parse.flows {
            agg.push(flow);
        }
        assert_eq!(agg.len(), 2); // two distinct 5-tuples

        let drained = agg.drain();
        let post_bytes: u64 = drained.iter().map(|f| f.bytes).sum();
        let post_packets: u64 = drained.iter().map(|f| f.packets).sum();
        assert_eq!(pre_bytes, post_bytes);
        assert_eq!(pre_packets, post_packets);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_industrial_port_table() {
        assert_eq!(industrial_protocol_for_port(502), Some("Modbus"));
        assert_eq!(industrial_protocol_for_port(102), Some("S7comm"));
        assert_eq!(industrial_protocol_for_port(2404), Some("IEC-104"));
        assert_eq!(industrial_protocol_for_port(4840), Some("OPC-UA"));
        assert_eq!(industrial_protocol_for_port(20000), Some("DNP3"));
        assert_eq!(industrial_protocol_for_port(44818), Some("EtherNet/IP"));
        assert_eq!(industrial_protocol_for_port(47808), Some("BACnet"));
        assert_eq!(industrial_protocol_for_port(34963), Some("PROFINET"));
        assert_eq!(industrial_protocol_for_port(443), None);
    }
}
