//! SNMPv3 message framing.
//!
//! Encoding tracks the byte offset of msgAuthenticationParameters in the
//! finished buffer so the client can patch the HMAC in place after
//! encoding, and zero it in place when verifying a received message.

use crate::ber::{self, BerValue, Reader, TAG_SEQUENCE};
use crate::oid::Oid;
use crate::SnmpError;

pub const SNMP_VERSION_3: i64 = 3;
pub const USM_SECURITY_MODEL: i64 = 3;
/// Reportable flag in msgFlags.
pub const FLAG_REPORTABLE: u8 = 0x04;

/// usmStats OIDs carried in Report PDUs during discovery/time sync.
pub const USM_STATS_UNKNOWN_ENGINE_IDS: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0];
pub const USM_STATS_NOT_IN_TIME_WINDOWS: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0];

/// PDU kinds (context-class tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    Response,
    SetRequest,
    GetBulkRequest,
    InformRequest,
    TrapV2,
    Report,
}

impl PduType {
    pub fn tag(&self) -> u8 {
        match self {
            PduType::GetRequest => 0xa0,
            PduType::GetNextRequest => 0xa1,
            PduType::Response => 0xa2,
            PduType::SetRequest => 0xa3,
            PduType::GetBulkRequest => 0xa5,
            PduType::InformRequest => 0xa6,
            PduType::TrapV2 => 0xa7,
            PduType::Report => 0xa8,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0xa0 => Some(PduType::GetRequest),
            0xa1 => Some(PduType::GetNextRequest),
            0xa2 => Some(PduType::Response),
            0xa3 => Some(PduType::SetRequest),
            0xa5 => Some(PduType::GetBulkRequest),
            0xa6 => Some(PduType::InformRequest),
            0xa7 => Some(PduType::TrapV2),
            0xa8 => Some(PduType::Report),
            _ => None,
        }
    }
}

/// One variable binding.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: BerValue,
}

impl VarBind {
    pub fn null(oid: Oid) -> Self {
        VarBind {
            oid,
            value: BerValue::Null,
        }
    }
}

/// A request or response PDU. For GetBulk, `error_status` carries
/// non-repeaters and `error_index` max-repetitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

/// The plaintext scoped PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedPdu {
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
    pub pdu: Pdu,
}

/// USM security parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsmParams {
    pub engine_id: Vec<u8>,
    pub engine_boots: u32,
    pub engine_time: u32,
    pub user_name: String,
    pub auth_params: Vec<u8>,
    pub priv_params: Vec<u8>,
}

/// Scoped data: plaintext or an encrypted octet string.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopedData {
    Plain(ScopedPdu),
    Encrypted(Vec<u8>),
}

/// A whole SNMPv3 message.
#[derive(Debug, Clone, PartialEq)]
pub struct V3Message {
    pub msg_id: i32,
    pub max_size: i32,
    pub flags: u8,
    pub usm: UsmParams,
    pub data: ScopedData,
}

pub fn encode_pdu(pdu: &Pdu) -> Result<Vec<u8>, SnmpError> {
    let mut bindings = Vec::new();
    for vb in &pdu.varbinds {
        let mut one = Vec::new();
        ber::write_oid(&mut one, &vb.oid)?;
        ber::write_value(&mut one, &vb.value)?;
        ber::write_sequence(&mut bindings, &one);
    }

    let mut content = Vec::new();
    ber::write_integer(&mut content, pdu.request_id as i64);
    ber::write_integer(&mut content, pdu.error_status);
    ber::write_integer(&mut content, pdu.error_index);
    ber::write_sequence(&mut content, &bindings);

    let mut out = Vec::new();
    ber::write_tlv(&mut out, pdu.pdu_type.tag(), &content);
    Ok(out)
}

pub fn decode_pdu(tag: u8, content: &[u8]) -> Result<Pdu, SnmpError> {
    let pdu_type = PduType::from_tag(tag)
        .ok_or_else(|| SnmpError::Decode(format!("unknown PDU tag {tag:#04x}")))?;
    let mut reader = Reader::new(content);
    let request_id = reader.read_integer()? as i32;
    let error_status = reader.read_integer()?;
    let error_index = reader.read_integer()?;
    let bindings_content = reader.expect(TAG_SEQUENCE)?;

    let mut varbinds = Vec::new();
    let mut bindings = Reader::new(bindings_content);
    while !bindings.is_empty() {
        let vb_content = bindings.expect(TAG_SEQUENCE)?;
        let mut vb = Reader::new(vb_content);
        let (oid_tag, oid_content) = vb.read_tlv()?;
        let oid = match ber::decode_value(oid_tag, oid_content)? {
            BerValue::Oid(oid) => oid,
            other => {
                return Err(SnmpError::Decode(format!(
                    "varbind name is not an OID: {other:?}"
                )))
            }
        };
        let value = vb.read_value()?;
        varbinds.push(VarBind { oid, value });
    }

    Ok(Pdu {
        pdu_type,
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

pub fn encode_scoped_pdu(scoped: &ScopedPdu) -> Result<Vec<u8>, SnmpError> {
    let mut content = Vec::new();
    ber::write_octet_string(&mut content, &scoped.context_engine_id);
    ber::write_octet_string(&mut content, &scoped.context_name);
    content.extend_from_slice(&encode_pdu(&scoped.pdu)?);

    let mut out = Vec::new();
    ber::write_sequence(&mut out, &content);
    Ok(out)
}

pub fn decode_scoped_pdu(buf: &[u8]) -> Result<ScopedPdu, SnmpError> {
    let mut reader = Reader::new(buf);
    let content = reader.expect(TAG_SEQUENCE)?;
    let mut inner = Reader::new(content);
    let context_engine_id = inner.read_octet_string()?.to_vec();
    let context_name = inner.read_octet_string()?.to_vec();
    let (tag, pdu_content) = inner.read_tlv()?;
    let pdu = decode_pdu(tag, pdu_content)?;
    Ok(ScopedPdu {
        context_engine_id,
        context_name,
        pdu,
    })
}

fn encode_usm(usm: &UsmParams) -> (Vec<u8>, usize) {
    let mut content = Vec::new();
    ber::write_octet_string(&mut content, &usm.engine_id);
    ber::write_integer(&mut content, usm.engine_boots as i64);
    ber::write_integer(&mut content, usm.engine_time as i64);
    ber::write_octet_string(&mut content, usm.user_name.as_bytes());
    // Offset of the auth parameter *value* within `content`:
    // tag byte + length byte(s); auth params are always short.
    let auth_value_offset = content.len() + 2;
    ber::write_octet_string(&mut content, &usm.auth_params);
    ber::write_octet_string(&mut content, &usm.priv_params);

    let mut seq = Vec::new();
    ber::write_sequence(&mut seq, &content);
    // Offset within the SEQUENCE TLV = header size + offset in content.
    let header = seq.len() - content.len();
    (seq, header + auth_value_offset)
}

fn length_of_length(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        1 + (bytes.len() - skip)
    }
}

/// Encode a full message. Returns the buffer and, when auth params are
/// present, the offset of their first byte for in-place HMAC patching.
pub fn encode_message(msg: &V3Message) -> Result<(Vec<u8>, Option<usize>), SnmpError> {
    let mut header = Vec::new();
    ber::write_integer(&mut header, msg.msg_id as i64);
    ber::write_integer(&mut header, msg.max_size as i64);
    ber::write_octet_string(&mut header, &[msg.flags]);
    ber::write_integer(&mut header, USM_SECURITY_MODEL);
    let mut header_seq = Vec::new();
    ber::write_sequence(&mut header_seq, &header);

    let (usm_seq, auth_offset_in_usm) = encode_usm(&msg.usm);
    let mut usm_os = Vec::new();
    ber::write_octet_string(&mut usm_os, &usm_seq);
    let usm_os_header = usm_os.len() - usm_seq.len();

    let data = match &msg.data {
        ScopedData::Plain(scoped) => encode_scoped_pdu(scoped)?,
        ScopedData::Encrypted(ciphertext) => {
            let mut out = Vec::new();
            ber::write_octet_string(&mut out, ciphertext);
            out
        }
    };

    let mut version = Vec::new();
    ber::write_integer(&mut version, SNMP_VERSION_3);

    let content_len = version.len() + header_seq.len() + usm_os.len() + data.len();
    let outer_header = 1 + length_of_length(content_len);

    let mut out = Vec::with_capacity(outer_header + content_len);
    out.push(TAG_SEQUENCE);
    ber::write_length(&mut out, content_len);
    out.extend_from_slice(&version);
    out.extend_from_slice(&header_seq);
    let usm_start = out.len();
    out.extend_from_slice(&usm_os);
    out.extend_from_slice(&data);

    let auth_offset = if msg.usm.auth_params.is_empty() {
        None
    } else {
        Some(usm_start + usm_os_header + auth_offset_in_usm)
    };
    Ok((out, auth_offset))
}

/// Decode a message. Returns the message and the offset/length of the
/// auth parameters in the original buffer (for HMAC verification).
pub fn decode_message(buf: &[u8]) -> Result<(V3Message, Option<(usize, usize)>), SnmpError> {
    let mut reader = Reader::new(buf);
    let content = reader.expect(TAG_SEQUENCE)?;
    let outer_header = buf.len() - content.len();

    let mut inner = Reader::new(content);
    let version = inner.read_integer()?;
    if version != SNMP_VERSION_3 {
        return Err(SnmpError::Decode(format!(
            "unsupported SNMP version {version}"
        )));
    }

    let header_content = inner.expect(TAG_SEQUENCE)?;
    let mut header = Reader::new(header_content);
    let msg_id = header.read_integer()? as i32;
    let max_size = header.read_integer()? as i32;
    let flags_bytes = header.read_octet_string()?;
    let flags = *flags_bytes
        .first()
        .ok_or_else(|| SnmpError::Decode("empty msgFlags".to_string()))?;
    let _security_model = header.read_integer()?;

    let usm_blob = inner.read_octet_string()?;
    // Offset of the USM blob inside the full buffer, for locating the
    // auth params.
    let usm_blob_offset = outer_header
        + (usm_blob.as_ptr() as usize)
            .checked_sub(content.as_ptr() as usize)
            .ok_or_else(|| SnmpError::Decode("internal offset error".to_string()))?;

    let mut usm_reader = Reader::new(usm_blob);
    let usm_content = usm_reader.expect(TAG_SEQUENCE)?;
    let usm_seq_header = usm_blob.len() - usm_content.len();
    let mut usm = Reader::new(usm_content);
    let engine_id = usm.read_octet_string()?.to_vec();
    let engine_boots = usm.read_integer()? as u32;
    let engine_time = usm.read_integer()? as u32;
    let user_name = String::from_utf8_lossy(usm.read_octet_string()?).into_owned();
    let auth_bytes = usm.read_octet_string()?;
    let auth_offset = if auth_bytes.is_empty() {
        None
    } else {
        let off = usm_blob_offset
            + usm_seq_header
            + (auth_bytes.as_ptr() as usize)
                .checked_sub(usm_content.as_ptr() as usize)
                .ok_or_else(|| SnmpError::Decode("internal offset error".to_string()))?;
        Some((off, auth_bytes.len()))
    };
    let auth_params = auth_bytes.to_vec();
    let priv_params = usm.read_octet_string()?.to_vec();

    let privacy = flags & 0x02 != 0;
    let data = if privacy {
        ScopedData::Encrypted(inner.read_octet_string()?.to_vec())
    } else {
        let remaining_start = buf.len() - {
            // Everything after the USM blob is the scoped PDU.
            let mut probe = inner;
            let (tag, scoped_content) = probe.read_tlv()?;
            if tag != TAG_SEQUENCE {
                return Err(SnmpError::Decode(format!(
                    "scoped PDU tag {tag:#04x}, expected SEQUENCE"
                )));
            }
            // Re-encode boundary: tag + length + content.
            1 + length_of_length(scoped_content.len()) + scoped_content.len()
        };
        ScopedData::Plain(decode_scoped_pdu(&buf[remaining_start..])?)
    };

    Ok((
        V3Message {
            msg_id,
            max_size,
            flags,
            usm: UsmParams {
                engine_id,
                engine_boots,
                engine_time,
                user_name,
                auth_params,
                priv_params,
            },
            data,
        },
        auth_offset,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pdu() -> Pdu {
        Pdu {
            pdu_type: PduType::GetRequest,
            request_id: 12345,
            error_status: 0,
            error_index: 0,
            varbinds: vec![
                VarBind::null("1.3.6.1.2.1.1.1.0".parse().unwrap()),
                VarBind::null("1.3.6.1.2.1.1.5.0".parse().unwrap()),
            ],
        }
    }

    fn sample_scoped() -> ScopedPdu {
        ScopedPdu {
            context_engine_id: vec![0x80, 0x00, 0x1f, 0x88],
            context_name: Vec::new(),
            pdu: sample_pdu(),
        }
    }

    #[test]
    fn test_pdu_round_trip() {
        let pdu = sample_pdu();
        let encoded = encode_pdu(&pdu).unwrap();
        let mut reader = Reader::new(&encoded);
        let (tag, content) = reader.read_tlv().unwrap();
        let decoded = decode_pdu(tag, content).unwrap();
        assert_eq!(pdu, decoded);
    }

    #[test]
    fn test_scoped_pdu_round_trip() {
        let scoped = sample_scoped();
        let encoded = encode_scoped_pdu(&scoped).unwrap();
        let decoded = decode_scoped_pdu(&encoded).unwrap();
        assert_eq!(scoped, decoded);
    }

    #[test]
    fn test_message_round_trip_no_auth() {
        let msg = V3Message {
            msg_id: 77,
            max_size: 65507,
            flags: FLAG_REPORTABLE,
            usm: UsmParams {
                engine_id: Vec::new(),
                engine_boots: 0,
                engine_time: 0,
                user_name: "discovery".to_string(),
                auth_params: Vec::new(),
                priv_params: Vec::new(),
            },
            data: ScopedData::Plain(sample_scoped()),
        };
        let (encoded, auth_offset) = encode_message(&msg).unwrap();
        assert!(auth_offset.is_none());
        let (decoded, found) = decode_message(&encoded).unwrap();
        assert_eq!(msg, decoded);
        assert!(found.is_none());
    }

    #[test]
    fn test_auth_offset_points_at_params() {
        let msg = V3Message {
            msg_id: 42,
            max_size: 65507,
            flags: FLAG_REPORTABLE | 0x01,
            usm: UsmParams {
                engine_id: vec![0x80, 0x00, 0x1f, 0x88, 0x04],
                engine_boots: 9,
                engine_time: 1000,
                user_name: "ops".to_string(),
                auth_params: vec![0xaa; 12],
                priv_params: Vec::new(),
            },
            data: ScopedData::Plain(sample_scoped()),
        };
        let (encoded, auth_offset) = encode_message(&msg).unwrap();
        let offset = auth_offset.unwrap();
        assert_eq!(&encoded[offset..offset + 12], &[0xaa; 12]);

        let (decoded, found) = decode_message(&encoded).unwrap();
        assert_eq!(msg, decoded);
        let (found_offset, found_len) = found.unwrap();
        assert_eq!(found_offset, offset);
        assert_eq!(found_len, 12);
    }

    #[test]
    fn test_encrypted_data_round_trip() {
        let msg = V3Message {
            msg_id: 7,
            max_size: 65507,
            flags: FLAG_REPORTABLE | 0x03,
            usm: UsmParams {
                engine_id: vec![1, 2, 3],
                engine_boots: 1,
                engine_time: 2,
                user_name: "ops".to_string(),
                auth_params: vec![0; 12],
                priv_params: vec![0, 0, 0, 1, 0, 0, 0, 2],
            },
            data: ScopedData::Encrypted(vec![0xde, 0xad, 0xbe, 0xef]),
        };
        let (encoded, _) = encode_message(&msg).unwrap();
        let (decoded, _) = decode_message(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }
}
