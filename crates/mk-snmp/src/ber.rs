//! Minimal BER codec for the SNMP subset.
//!
//! SNMP uses a small, fixed set of universal and application tags, so a
//! hand-rolled TLV reader/writer is enough. Definite lengths only (BER
//! indefinite form is not legal in SNMP).

use crate::oid::Oid;
use crate::SnmpError;

// Universal tags.
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;

// SNMP application tags.
pub const TAG_IPADDRESS: u8 = 0x40;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_OPAQUE: u8 = 0x44;
pub const TAG_COUNTER64: u8 = 0x46;

// Context primitives used for varbind exceptions (SNMPv2).
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;

/// A decoded BER value from the SNMP universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BerValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    Oid(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl BerValue {
    /// The value as an unsigned counter, if it is numeric.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            BerValue::Integer(v) if *v >= 0 => Some(*v as u64),
            BerValue::Counter32(v) | BerValue::Gauge32(v) | BerValue::TimeTicks(v) => {
                Some(*v as u64)
            }
            BerValue::Counter64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            BerValue::Integer(v) => Some(*v),
            BerValue::Counter32(v) | BerValue::Gauge32(v) | BerValue::TimeTicks(v) => {
                Some(*v as i64)
            }
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BerValue::OctetString(b) | BerValue::Opaque(b) => Some(b),
            _ => None,
        }
    }

    /// Octet string interpreted as UTF-8 (lossy — agents ship all kinds
    /// of encodings in sysDescr).
    pub fn as_text(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// An end-of-subtree marker during a walk.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            BerValue::NoSuchObject | BerValue::NoSuchInstance | BerValue::EndOfMibView
        )
    }
}

/// Append one TLV with the given tag.
pub fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

/// BER definite length: short form below 128, long form otherwise.
pub fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let significant = &bytes[skip..];
        out.push(0x80 | significant.len() as u8);
        out.extend_from_slice(significant);
    }
}

pub fn write_integer(out: &mut Vec<u8>, value: i64) {
    let mut content = value.to_be_bytes().to_vec();
    // Trim to the minimal two's-complement representation.
    while content.len() > 1 {
        if (content[0] == 0x00 && content[1] & 0x80 == 0)
            || (content[0] == 0xff && content[1] & 0x80 != 0)
        {
            content.remove(0);
        } else {
            break;
        }
    }
    write_tlv(out, TAG_INTEGER, &content);
}

/// Unsigned value under an application tag (Counter32, Gauge32, ...).
pub fn write_unsigned(out: &mut Vec<u8>, tag: u8, value: u64) {
    let mut content = value.to_be_bytes().to_vec();
    while content.len() > 1 && content[0] == 0 && content[1] & 0x80 == 0 {
        content.remove(0);
    }
    // A leading 1-bit would read as negative; unsigned types need a pad.
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }
    write_tlv(out, tag, &content);
}

pub fn write_octet_string(out: &mut Vec<u8>, bytes: &[u8]) {
    write_tlv(out, TAG_OCTET_STRING, bytes);
}

pub fn write_null(out: &mut Vec<u8>) {
    write_tlv(out, TAG_NULL, &[]);
}

pub fn write_oid(out: &mut Vec<u8>, oid: &Oid) -> Result<(), SnmpError> {
    let arcs = oid.arcs();
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return Err(SnmpError::Encode(format!("unencodable OID: {}", oid)));
    }
    let mut content = Vec::with_capacity(arcs.len() + 1);
    push_base128(&mut content, arcs[0] * 40 + arcs[1]);
    for &arc in &arcs[2..] {
        push_base128(&mut content, arc);
    }
    write_tlv(out, TAG_OID, &content);
    Ok(())
}

fn push_base128(out: &mut Vec<u8>, value: u32) {
    if value == 0 {
        out.push(0);
        return;
    }
    let mut chunks = [0u8; 5];
    let mut n = 0;
    let mut v = value;
    while v > 0 {
        chunks[n] = (v & 0x7f) as u8;
        v >>= 7;
        n += 1;
    }
    for i in (0..n).rev() {
        let mut byte = chunks[i];
        if i > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Wrap already-encoded content in a SEQUENCE.
pub fn write_sequence(out: &mut Vec<u8>, content: &[u8]) {
    write_tlv(out, TAG_SEQUENCE, content);
}

pub fn write_value(out: &mut Vec<u8>, value: &BerValue) -> Result<(), SnmpError> {
    match value {
        BerValue::Integer(v) => write_integer(out, *v),
        BerValue::OctetString(b) => write_octet_string(out, b),
        BerValue::Null => write_null(out),
        BerValue::Oid(oid) => write_oid(out, oid)?,
        BerValue::IpAddress(octets) => write_tlv(out, TAG_IPADDRESS, octets),
        BerValue::Counter32(v) => write_unsigned(out, TAG_COUNTER32, *v as u64),
        BerValue::Gauge32(v) => write_unsigned(out, TAG_GAUGE32, *v as u64),
        BerValue::TimeTicks(v) => write_unsigned(out, TAG_TIMETICKS, *v as u64),
        BerValue::Opaque(b) => write_tlv(out, TAG_OPAQUE, b),
        BerValue::Counter64(v) => write_unsigned(out, TAG_COUNTER64, *v),
        BerValue::NoSuchObject => write_tlv(out, TAG_NO_SUCH_OBJECT, &[]),
        BerValue::NoSuchInstance => write_tlv(out, TAG_NO_SUCH_INSTANCE, &[]),
        BerValue::EndOfMibView => write_tlv(out, TAG_END_OF_MIB_VIEW, &[]),
    }
    Ok(())
}

/// A cursor over a BER-encoded buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SnmpError> {
        if self.pos + n > self.buf.len() {
            return Err(SnmpError::Decode("truncated message".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one TLV, returning the tag and raw content.
    pub fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), SnmpError> {
        let tag = self.take(1)?[0];
        let first = self.take(1)?[0];
        let len = if first < 0x80 {
            first as usize
        } else {
            let n = (first & 0x7f) as usize;
            if n == 0 || n > 4 {
                return Err(SnmpError::Decode(format!("unsupported length form {n}")));
            }
            let mut len = 0usize;
            for &b in self.take(n)? {
                len = (len << 8) | b as usize;
            }
            len
        };
        let content = self.take(len)?;
        Ok((tag, content))
    }

    /// Read a TLV, requiring a specific tag.
    pub fn expect(&mut self, expected: u8) -> Result<&'a [u8], SnmpError> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(SnmpError::Decode(format!(
                "expected tag {expected:#04x}, got {tag:#04x}"
            )));
        }
        Ok(content)
    }

    pub fn read_integer(&mut self) -> Result<i64, SnmpError> {
        let content = self.expect(TAG_INTEGER)?;
        decode_integer(content)
    }

    pub fn read_octet_string(&mut self) -> Result<&'a [u8], SnmpError> {
        self.expect(TAG_OCTET_STRING)
    }

    pub fn read_value(&mut self) -> Result<BerValue, SnmpError> {
        let (tag, content) = self.read_tlv()?;
        decode_value(tag, content)
    }
}

fn decode_integer(content: &[u8]) -> Result<i64, SnmpError> {
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::Decode(format!(
            "integer of length {}",
            content.len()
        )));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | b as i64;
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8], max_len: usize) -> Result<u64, SnmpError> {
    let content = if !content.is_empty() && content[0] == 0 {
        &content[1..]
    } else {
        content
    };
    if content.len() > max_len {
        return Err(SnmpError::Decode(format!(
            "unsigned of length {}",
            content.len()
        )));
    }
    let mut value: u64 = 0;
    for &b in content {
        value = (value << 8) | b as u64;
    }
    Ok(value)
}

fn decode_oid(content: &[u8]) -> Result<Oid, SnmpError> {
    if content.is_empty() {
        return Err(SnmpError::Decode("empty OID".to_string()));
    }
    let mut arcs = Vec::new();
    let mut iter = content.iter().peekable();
    let mut first = true;
    while iter.peek().is_some() {
        let mut arc: u32 = 0;
        loop {
            let b = *iter
                .next()
                .ok_or_else(|| SnmpError::Decode("truncated OID arc".to_string()))?;
            arc = arc
                .checked_shl(7)
                .ok_or_else(|| SnmpError::Decode("OID arc overflow".to_string()))?
                | (b & 0x7f) as u32;
            if b & 0x80 == 0 {
                break;
            }
        }
        if first {
            arcs.push((arc / 40).min(2));
            arcs.push(arc - arcs[0] * 40);
            first = false;
        } else {
            arcs.push(arc);
        }
    }
    Ok(Oid::from_slice(&arcs))
}

pub fn decode_value(tag: u8, content: &[u8]) -> Result<BerValue, SnmpError> {
    match tag {
        TAG_INTEGER => Ok(BerValue::Integer(decode_integer(content)?)),
        TAG_OCTET_STRING => Ok(BerValue::OctetString(content.to_vec())),
        TAG_NULL => Ok(BerValue::Null),
        TAG_OID => Ok(BerValue::Oid(decode_oid(content)?)),
        TAG_IPADDRESS => {
            if content.len() != 4 {
                return Err(SnmpError::Decode("IpAddress not 4 octets".to_string()));
            }
            Ok(BerValue::IpAddress([
                content[0], content[1], content[2], content[3],
            ]))
        }
        TAG_COUNTER32 => Ok(BerValue::Counter32(decode_unsigned(content, 4)? as u32)),
        TAG_GAUGE32 => Ok(BerValue::Gauge32(decode_unsigned(content, 4)? as u32)),
        TAG_TIMETICKS => Ok(BerValue::TimeTicks(decode_unsigned(content, 4)? as u32)),
        TAG_OPAQUE => Ok(BerValue::Opaque(content.to_vec())),
        TAG_COUNTER64 => Ok(BerValue::Counter64(decode_unsigned(content, 8)?)),
        TAG_NO_SUCH_OBJECT => Ok(BerValue::NoSuchObject),
        TAG_NO_SUCH_INSTANCE => Ok(BerValue::NoSuchInstance),
        TAG_END_OF_MIB_VIEW => Ok(BerValue::EndOfMibView),
        other => Err(SnmpError::Decode(format!("unsupported tag {other:#04x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: BerValue) -> BerValue {
        let mut buf = Vec::new();
        write_value(&mut buf, &value).unwrap();
        let mut reader = Reader::new(&buf);
        reader.read_value().unwrap()
    }

    #[test]
    fn test_integer_round_trip() {
        for v in [0i64, 1, 127, 128, 255, 256, -1, -128, -129, i32::MAX as i64] {
            assert_eq!(round_trip(BerValue::Integer(v)), BerValue::Integer(v));
        }
    }

    #[test]
    fn test_integer_minimal_encoding() {
        let mut buf = Vec::new();
        write_integer(&mut buf, 127);
        assert_eq!(buf, vec![0x02, 0x01, 0x7f]);

        let mut buf = Vec::new();
        write_integer(&mut buf, 128);
        assert_eq!(buf, vec![0x02, 0x02, 0x00, 0x80]);
    }

    #[test]
    fn test_oid_round_trip() {
        let oid: Oid = "1.3.6.1.2.1.1.1.0".parse().unwrap();
        assert_eq!(round_trip(BerValue::Oid(oid.clone())), BerValue::Oid(oid));
    }

    #[test]
    fn test_oid_multibyte_arc() {
        // LLDP MIB lives under 1.0.8802... — 8802 needs two base-128 bytes.
        let oid: Oid = "1.0.8802.1.1.2".parse().unwrap();
        assert_eq!(round_trip(BerValue::Oid(oid.clone())), BerValue::Oid(oid));
    }

    #[test]
    fn test_counter64_round_trip() {
        let v = BerValue::Counter64(u64::MAX - 5);
        assert_eq!(round_trip(v.clone()), v);
    }

    #[test]
    fn test_long_form_length() {
        let payload = vec![0xabu8; 300];
        let mut buf = Vec::new();
        write_octet_string(&mut buf, &payload);
        assert_eq!(buf[1], 0x82); // two length octets
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_octet_string().unwrap(), &payload[..]);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut buf = Vec::new();
        write_octet_string(&mut buf, b"hello");
        buf.truncate(buf.len() - 2);
        let mut reader = Reader::new(&buf);
        assert!(reader.read_value().is_err());
    }

    #[test]
    fn test_exception_values() {
        assert!(round_trip(BerValue::EndOfMibView).is_exception());
        assert!(round_trip(BerValue::NoSuchObject).is_exception());
        assert!(!BerValue::Null.is_exception());
    }
}
