//! Syslog parsing: RFC 5424, with a tolerant RFC 3164 fallback.
//!
//! Security-event classification: severity ≤ 3, or the message text
//! contains one of a fixed set of indicator words.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

use mk_model::{AlertSeverity, SyslogMessage, SyslogPayload};

use crate::ParseError;

const SECURITY_KEYWORDS: &[&str] = &[
    "failed",
    "denied",
    "violation",
    "unauthorized",
    "attack",
    "malware",
];

fn rfc3164_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "Mmm dd hh:mm:ss hostname rest"
        Regex::new(
            r"^(?P<month>[A-Z][a-z]{2})\s+(?P<day>\d{1,2})\s+(?P<time>\d{2}:\d{2}:\d{2})\s+(?P<host>\S+)\s+(?P<rest>.*)$",
        )
        .expect("static regex")
    })
}

/// True if the message qualifies as a security event.
pub fn is_security_event(severity: u8, text: &str) -> bool {
    if severity <= 3 {
        return true;
    }
    let lower = text.to_lowercase();
    SECURITY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Alert severity for a security event, from the syslog severity.
pub fn alert_severity_for(syslog_severity: u8) -> AlertSeverity {
    match syslog_severity {
        0 | 1 => AlertSeverity::Critical,
        2 => AlertSeverity::High,
        3 => AlertSeverity::Medium,
        _ => AlertSeverity::Low,
    }
}

/// Parse a syslog datagram. `received_at` substitutes for a missing or
/// unparseable timestamp.
pub fn parse_syslog(raw: &str, received_at: DateTime<Utc>) -> Result<SyslogPayload, ParseError> {
    let raw = raw.trim_end_matches(['\r', '\n', '\0']);
    let (pri, rest) = parse_pri(raw)?;
    let facility = (pri / 8) as u8;
    let severity = (pri % 8) as u8;
    if facility > 23 {
        return Err(ParseError::Syslog(format!("facility {facility} out of range")));
    }

    let message = if rest.starts_with("1 ") {
        parse_rfc5424(&rest[2..], facility, severity, received_at)?
    } else {
        parse_rfc3164(rest, facility, severity, received_at)
    };

    let security_event = is_security_event(message.severity, &message.message);
    Ok(SyslogPayload {
        message,
        security_event,
    })
}

fn parse_pri(raw: &str) -> Result<(u16, &str), ParseError> {
    if !raw.starts_with('<') {
        return Err(ParseError::Syslog("missing <PRI>".to_string()));
    }
    let end = raw
        .find('>')
        .ok_or_else(|| ParseError::Syslog("unterminated <PRI>".to_string()))?;
    if end < 2 || end > 4 {
        return Err(ParseError::Syslog("bad <PRI> length".to_string()));
    }
    let pri: u16 = raw[1..end]
        .parse()
        .map_err(|_| ParseError::Syslog("non-numeric PRI".to_string()))?;
    if pri > 191 {
        return Err(ParseError::Syslog(format!("PRI {pri} out of range")));
    }
    Ok((pri, &raw[end + 1..]))
}

fn nil(token: &str) -> Option<String> {
    if token == "-" {
        None
    } else {
        Some(token.to_string())
    }
}

fn parse_rfc5424(
    rest: &str,
    facility: u8,
    severity: u8,
    received_at: DateTime<Utc>,
) -> Result<SyslogMessage, ParseError> {
    let mut parts = rest.splitn(6, ' ');
    let timestamp_tok = parts
        .next()
        .ok_or_else(|| ParseError::Syslog("missing timestamp".to_string()))?;
    let hostname = parts
        .next()
        .ok_or_else(|| ParseError::Syslog("missing hostname".to_string()))?;
    let app_name = parts
        .next()
        .ok_or_else(|| ParseError::Syslog("missing app-name".to_string()))?;
    let proc_id = parts
        .next()
        .ok_or_else(|| ParseError::Syslog("missing procid".to_string()))?;
    let msg_id = parts
        .next()
        .ok_or_else(|| ParseError::Syslog("missing msgid".to_string()))?;
    let sd_and_msg = parts.next().unwrap_or("");

    let timestamp = if timestamp_tok == "-" {
        received_at
    } else {
        DateTime::parse_from_rfc3339(timestamp_tok)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(received_at)
    };

    let (structured_data, message) = parse_structured_data(sd_and_msg)?;

    Ok(SyslogMessage {
        facility,
        severity,
        timestamp,
        hostname: nil(hostname),
        app_name: nil(app_name),
        proc_id: nil(proc_id),
        msg_id: nil(msg_id),
        message,
        structured_data,
    })
}

type StructuredData = BTreeMap<String, BTreeMap<String, String>>;

fn parse_structured_data(input: &str) -> Result<(StructuredData, String), ParseError> {
    let mut sd = StructuredData::new();
    let input = input.trim_start();
    if let Some(rest) = input.strip_prefix('-') {
        return Ok((sd, rest.trim_start().to_string()));
    }
    if !input.starts_with('[') {
        // No SD at all; the remainder is the message.
        return Ok((sd, input.to_string()));
    }

    let mut chars = input.char_indices().peekable();
    let mut end = 0usize;
    while let Some(&(i, c)) = chars.peek() {
        if c != '[' {
            end = i;
            break;
        }
        // Find the matching unescaped ']'.
        let mut close = None;
        let mut escaped = false;
        let mut in_quotes = false;
        for (j, cj) in input[i..].char_indices() {
            let abs = i + j;
            match cj {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_quotes = !in_quotes,
                ']' if !escaped && !in_quotes => {
                    close = Some(abs);
                    break;
                }
                _ => escaped = false,
            }
        }
        let close =
            close.ok_or_else(|| ParseError::Syslog("unterminated SD element".to_string()))?;
        let element = &input[i + 1..close];
        let mut tokens = element.splitn(2, ' ');
        let sd_id = tokens.next().unwrap_or("").to_string();
        let mut params = BTreeMap::new();
        if let Some(param_str) = tokens.next() {
            for cap in param_re().captures_iter(param_str) {
                params.insert(cap[1].to_string(), cap[2].replace("\\\"", "\""));
            }
        }
        sd.insert(sd_id, params);

        // Advance past this element.
        while let Some(&(k, _)) = chars.peek() {
            if k > close {
                break;
            }
            chars.next();
        }
        end = close + 1;
    }

    let message = input[end..].trim_start().to_string();
    Ok((sd, message))
}

fn param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(\S+)="((?:[^"\\]|\\.)*)""#).expect("static regex"))
}

fn parse_rfc3164(
    rest: &str,
    facility: u8,
    severity: u8,
    received_at: DateTime<Utc>,
) -> SyslogMessage {
    if let Some(caps) = rfc3164_re().captures(rest) {
        let timestamp = rfc3164_timestamp(&caps["month"], &caps["day"], &caps["time"], received_at)
            .unwrap_or(received_at);
        let rest = &caps["rest"];
        // "tag[pid]: message" or "tag: message"
        let (app_name, proc_id, message) = split_tag(rest);
        SyslogMessage {
            facility,
            severity,
            timestamp,
            hostname: Some(caps["host"].to_string()),
            app_name,
            proc_id,
            msg_id: None,
            message,
            structured_data: BTreeMap::new(),
        }
    } else {
        // Tolerate bare content after the PRI.
        SyslogMessage {
            facility,
            severity,
            timestamp: received_at,
            hostname: None,
            app_name: None,
            proc_id: None,
            msg_id: None,
            message: rest.to_string(),
            structured_data: BTreeMap::new(),
        }
    }
}

fn split_tag(rest: &str) -> (Option<String>, Option<String>, String) {
    if let Some(colon) = rest.find(':') {
        let tag = &rest[..colon];
        let message = rest[colon + 1..].trim_start().to_string();
        if let (Some(open), Some(close)) = (tag.find('['), tag.find(']')) {
            if open < close {
                return (
                    Some(tag[..open].to_string()),
                    Some(tag[open + 1..close].to_string()),
                    message,
                );
            }
        }
        if !tag.contains(' ') {
            return (Some(tag.to_string()), None, message);
        }
    }
    (None, None, rest.to_string())
}

fn rfc3164_timestamp(
    month: &str,
    day: &str,
    time: &str,
    received_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let month = match month {
        "Jan" => 1, "Feb" => 2, "Mar" => 3, "Apr" => 4, "May" => 5, "Jun" => 6,
        "Jul" => 7, "Aug" => 8, "Sep" => 9, "Oct" => 10, "Nov" => 11, "Dec" => 12,
        _ => return None,
    };
    let day: u32 = day.parse().ok()?;
    let mut parts = time.split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let min: u32 = parts.next()?.parse().ok()?;
    let sec: u32 = parts.next()?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(received_at.year(), month, day)?;
    let naive = date.and_hms_opt(hour, min, sec)?;
    Utc.from_utc_datetime(&naive).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc5424_full() {
        let raw = r#"<165>1 2026-03-14T09:26:53.589Z scada-hist1 httpd 2301 ID47 [origin ip="10.0.3.4"] service restarted"#;
        let payload = parse_syslog(raw, Utc::now()).unwrap();
        let m = &payload.message;
        assert_eq!(m.facility, 20);
        assert_eq!(m.severity, 5);
        assert_eq!(m.hostname.as_deref(), Some("scada-hist1"));
        assert_eq!(m.app_name.as_deref(), Some("httpd"));
        assert_eq!(m.proc_id.as_deref(), Some("2301"));
        assert_eq!(m.msg_id.as_deref(), Some("ID47"));
        assert_eq!(m.message, "service restarted");
        assert_eq!(m.structured_data["origin"]["ip"], "10.0.3.4");
        assert!(!payload.security_event);
    }

    #[test]
    fn test_rfc5424_nil_fields_use_reception_time() {
        let received = Utc::now();
        let raw = "<34>1 - - - - - something happened";
        let payload = parse_syslog(raw, received).unwrap();
        assert_eq!(payload.message.timestamp, received);
        assert!(payload.message.hostname.is_none());
        assert_eq!(payload.message.message, "something happened");
        // severity 2 → security event regardless of text
        assert!(payload.security_event);
    }

    #[test]
    fn test_rfc3164_fallback() {
        let raw = "<34>Oct 11 22:14:15 fw01 sshd[4242]: authentication failure";
        let payload = parse_syslog(raw, Utc::now()).unwrap();
        let m = &payload.message;
        assert_eq!(m.facility, 4);
        assert_eq!(m.severity, 2);
        assert_eq!(m.hostname.as_deref(), Some("fw01"));
        assert_eq!(m.app_name.as_deref(), Some("sshd"));
        assert_eq!(m.proc_id.as_deref(), Some("4242"));
        assert_eq!(m.message, "authentication failure");
    }

    #[test]
    fn test_security_event_by_keyword() {
        assert!(is_security_event(6, "Login FAILED for user bob"));
        assert!(is_security_event(5, "access denied"));
        assert!(is_security_event(7, "policy VIOLATION detected"));
        assert!(is_security_event(6, "unauthorized request"));
        assert!(is_security_event(6, "possible attack vector"));
        assert!(is_security_event(6, "malware signature hit"));
        assert!(!is_security_event(6, "interface up"));
    }

    #[test]
    fn test_security_event_by_severity() {
        assert!(is_security_event(0, "anything"));
        assert!(is_security_event(3, "anything"));
        assert!(!is_security_event(4, "routine"));
    }

    #[test]
    fn test_alert_severity_mapping() {
        assert_eq!(alert_severity_for(0), AlertSeverity::Critical);
        assert_eq!(alert_severity_for(1), AlertSeverity::Critical);
        assert_eq!(alert_severity_for(2), AlertSeverity::High);
        assert_eq!(alert_severity_for(3), AlertSeverity::Medium);
        assert_eq!(alert_severity_for(5), AlertSeverity::Low);
    }

    #[test]
    fn test_pri_boundaries() {
        // severity 7 / facility 23 is the maximum legal PRI (191).
        assert!(parse_syslog("<191>1 - host app - - ok", Utc::now()).is_ok());
        // PRI 192 would be facility 24 — rejected.
        assert!(parse_syslog("<192>1 - host app - - ok", Utc::now()).is_err());
        assert!(parse_syslog("no pri here", Utc::now()).is_err());
    }

    #[test]
    fn test_scenario_unauthorized_access() {
        let raw = "<34>1 - scada-hist1 app - - unauthorized access denied for user operator";
        let payload = parse_syslog(raw, Utc::now()).unwrap();
        assert_eq!(payload.message.severity, 2);
        assert!(payload.security_event);
        assert_eq!(alert_severity_for(payload.message.severity), AlertSeverity::High);
    }
}
