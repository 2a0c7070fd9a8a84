//! Asynchronous SNMPv3 client over UDP.
//!
//! One client instance talks to one agent. Engine discovery happens on
//! the first request; boots/time are tracked from the discovery response
//! and re-synchronized when the agent reports notInTimeWindow.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;

use crate::message::{
    decode_message, encode_message, Pdu, PduType, ScopedData, ScopedPdu, UsmParams, V3Message,
    VarBind, FLAG_REPORTABLE, USM_STATS_NOT_IN_TIME_WINDOWS, USM_STATS_UNKNOWN_ENGINE_IDS,
};
use crate::oid::Oid;
use crate::usm::{
    self, auth_params, localized_key, localized_priv_key, verify_auth, AuthProtocol, PrivProtocol,
    SecurityLevel,
};
use crate::SnmpError;

const MAX_MESSAGE_SIZE: i32 = 65507;
const RECV_BUF: usize = 65535;

/// Configuration for one SNMPv3 target.
#[derive(Debug, Clone)]
pub struct SnmpTarget {
    pub host: Ipv4Addr,
    pub port: u16,
    pub security_name: String,
    pub security_level: SecurityLevel,
    pub auth: Option<(AuthProtocol, String)>,
    pub privacy: Option<(PrivProtocol, String)>,
    pub timeout: Duration,
    pub retries: u32,
}

impl SnmpTarget {
    /// Validate the level/credential combination before any network I/O.
    pub fn validate(&self) -> Result<(), SnmpError> {
        match self.security_level {
            SecurityLevel::AuthPriv => {
                if self.auth.is_none() || self.privacy.is_none() {
                    return Err(SnmpError::Config(
                        "authPriv requires auth and privacy credentials".to_string(),
                    ));
                }
            }
            SecurityLevel::AuthNoPriv => {
                if self.auth.is_none() {
                    return Err(SnmpError::Config(
                        "authNoPriv requires auth credentials".to_string(),
                    ));
                }
            }
            SecurityLevel::NoAuthNoPriv => {}
        }
        for key in self
            .auth
            .iter()
            .map(|(_, k)| k)
            .chain(self.privacy.iter().map(|(_, k)| k))
        {
            if key.len() < 8 {
                return Err(SnmpError::Config(
                    "SNMPv3 keys must be at least 8 characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

struct EngineState {
    engine_id: Vec<u8>,
    boots: u32,
    /// Engine time at discovery, advanced by the local clock.
    time_at_sync: u32,
    synced_at: Instant,
    auth_key: Vec<u8>,
    priv_key: Vec<u8>,
}

impl EngineState {
    fn current_time(&self) -> u32 {
        self.time_at_sync
            .saturating_add(self.synced_at.elapsed().as_secs() as u32)
    }
}

/// An SNMPv3 session with one agent.
pub struct SnmpClient {
    socket: UdpSocket,
    target: SnmpTarget,
    peer: SocketAddr,
    engine: Option<EngineState>,
    msg_id: i32,
    request_id: i32,
    salt: u64,
}

impl SnmpClient {
    /// Bind an ephemeral socket and discover the agent's engine.
    pub async fn connect(target: SnmpTarget) -> Result<Self, SnmpError> {
        target.validate()?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let peer = SocketAddr::from((target.host, target.port));
        socket.connect(peer).await?;

        let (msg_id, request_id, salt) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(1..0x4000_0000),
                rng.gen_range(1..0x4000_0000),
                rng.gen(),
            )
        };
        let mut client = SnmpClient {
            socket,
            target,
            peer,
            engine: None,
            msg_id,
            request_id,
            salt,
        };
        client.discover_engine().await?;
        Ok(client)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// GET on a set of OIDs.
    pub async fn get(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, SnmpError> {
        let pdu = self.build_pdu(PduType::GetRequest, oids, 0, 0);
        let response = self.request(pdu).await?;
        check_agent_error(&response)?;
        Ok(response.varbinds)
    }

    /// GET-NEXT on a set of OIDs.
    pub async fn get_next(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, SnmpError> {
        let pdu = self.build_pdu(PduType::GetNextRequest, oids, 0, 0);
        let response = self.request(pdu).await?;
        check_agent_error(&response)?;
        Ok(response.varbinds)
    }

    /// GET-BULK with the given max-repetitions.
    pub async fn get_bulk(
        &mut self,
        oids: &[Oid],
        max_repetitions: i64,
    ) -> Result<Vec<VarBind>, SnmpError> {
        let pdu = self.build_pdu(PduType::GetBulkRequest, oids, 0, max_repetitions);
        let response = self.request(pdu).await?;
        check_agent_error(&response)?;
        Ok(response.varbinds)
    }

    /// Walk an entire subtree with repeated GET-NEXT, stopping at the
    /// first OID outside `root` or an endOfMibView exception.
    pub async fn walk(&mut self, root: &Oid) -> Result<Vec<VarBind>, SnmpError> {
        let mut results = Vec::new();
        let mut current = root.clone();
        loop {
            let next = self.get_next(std::slice::from_ref(&current)).await?;
            let vb = match next.into_iter().next() {
                Some(vb) => vb,
                None => break,
            };
            if !vb.oid.starts_with(root) || vb.value.is_exception() {
                break;
            }
            if vb.oid == current {
                // Agent is stuck; bail rather than loop forever.
                break;
            }
            current = vb.oid.clone();
            results.push(vb);
        }
        Ok(results)
    }

    fn build_pdu(&mut self, pdu_type: PduType, oids: &[Oid], es: i64, ei: i64) -> Pdu {
        self.request_id = self.request_id.wrapping_add(1);
        Pdu {
            pdu_type,
            request_id: self.request_id,
            error_status: es,
            error_index: ei,
            varbinds: oids.iter().cloned().map(VarBind::null).collect(),
        }
    }

    async fn discover_engine(&mut self) -> Result<(), SnmpError> {
        let pdu = self.build_pdu(PduType::GetRequest, &[], 0, 0);
        let msg = V3Message {
            msg_id: self.next_msg_id(),
            max_size: MAX_MESSAGE_SIZE,
            flags: FLAG_REPORTABLE,
            usm: UsmParams::default(),
            data: ScopedData::Plain(ScopedPdu {
                context_engine_id: Vec::new(),
                context_name: Vec::new(),
                pdu,
            }),
        };
        let (buf, _) = encode_message(&msg)?;
        let response = self.exchange(&buf, msg.msg_id).await?;
        let (decoded, _) = decode_message(&response)?;

        let engine_id = decoded.usm.engine_id.clone();
        if engine_id.is_empty() {
            return Err(SnmpError::EngineDiscovery(
                "agent did not report an engine id".to_string(),
            ));
        }
        if let ScopedData::Plain(scoped) = &decoded.data {
            let is_report = scoped.pdu.pdu_type == PduType::Report;
            let unknown_engine = scoped.pdu.varbinds.iter().any(|vb| {
                vb.oid.arcs() == USM_STATS_UNKNOWN_ENGINE_IDS
            });
            if !is_report || !unknown_engine {
                log::debug!(
                    "engine discovery got {:?} instead of unknownEngineIDs report",
                    scoped.pdu.pdu_type
                );
            }
        }

        let auth_key = match &self.target.auth {
            Some((protocol, password)) => localized_key(*protocol, password, &engine_id)?,
            None => Vec::new(),
        };
        let priv_key = match (&self.target.auth, &self.target.privacy) {
            (Some((auth, _)), Some((privacy, password))) => {
                localized_priv_key(*auth, *privacy, password, &engine_id)?
            }
            _ => Vec::new(),
        };

        self.engine = Some(EngineState {
            engine_id,
            boots: decoded.usm.engine_boots,
            time_at_sync: decoded.usm.engine_time,
            synced_at: Instant::now(),
            auth_key,
            priv_key,
        });
        Ok(())
    }

    fn next_msg_id(&mut self) -> i32 {
        self.msg_id = self.msg_id.wrapping_add(1).max(1);
        self.msg_id
    }

    fn next_salt(&mut self) -> u64 {
        self.salt = self.salt.wrapping_add(1);
        self.salt
    }

    /// Send an authenticated (and possibly encrypted) request and decode
    /// the matching response. Re-syncs once on notInTimeWindow reports.
    async fn request(&mut self, pdu: Pdu) -> Result<Pdu, SnmpError> {
        for attempt in 0..2 {
            let response = self.request_once(pdu.clone()).await?;
            if response.pdu_type == PduType::Report {
                let time_window = response
                    .varbinds
                    .iter()
                    .any(|vb| vb.oid.arcs() == USM_STATS_NOT_IN_TIME_WINDOWS);
                if time_window && attempt == 0 {
                    log::debug!("agent {} reported notInTimeWindow, re-syncing", self.peer);
                    self.discover_engine().await?;
                    continue;
                }
                return Err(SnmpError::Protocol(format!(
                    "agent report: {}",
                    response
                        .varbinds
                        .first()
                        .map(|vb| vb.oid.to_string())
                        .unwrap_or_else(|| "empty".to_string())
                )));
            }
            return Ok(response);
        }
        unreachable!("time-window retry loop always returns")
    }

    async fn request_once(&mut self, pdu: Pdu) -> Result<Pdu, SnmpError> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| SnmpError::EngineDiscovery("engine not discovered".to_string()))?;

        let engine_id = engine.engine_id.clone();
        let boots = engine.boots;
        let time = engine.current_time();
        let auth_key = engine.auth_key.clone();
        let priv_key = engine.priv_key.clone();

        let scoped = ScopedPdu {
            context_engine_id: engine_id.clone(),
            context_name: Vec::new(),
            pdu,
        };

        let use_auth = !matches!(self.target.security_level, SecurityLevel::NoAuthNoPriv);
        let use_priv = matches!(self.target.security_level, SecurityLevel::AuthPriv);

        let (data, priv_params) = if use_priv {
            let privacy = self
                .target
                .privacy
                .as_ref()
                .map(|(p, _)| *p)
                .ok_or_else(|| SnmpError::Config("privacy credentials missing".to_string()))?;
            let plaintext = crate::message::encode_scoped_pdu(&scoped)?;
            let salt = self.next_salt();
            let (ciphertext, params) =
                usm::encrypt(privacy, &priv_key, boots, time, salt, &plaintext)?;
            (ScopedData::Encrypted(ciphertext), params)
        } else {
            (ScopedData::Plain(scoped), Vec::new())
        };

        let auth_protocol = self.target.auth.as_ref().map(|(p, _)| *p);
        let auth_placeholder = auth_protocol
            .filter(|_| use_auth)
            .map(|p| vec![0u8; p.auth_param_len()])
            .unwrap_or_default();

        let msg = V3Message {
            msg_id: self.next_msg_id(),
            max_size: MAX_MESSAGE_SIZE,
            flags: FLAG_REPORTABLE | self.target.security_level.flags(),
            usm: UsmParams {
                engine_id,
                engine_boots: boots,
                engine_time: time,
                user_name: self.target.security_name.clone(),
                auth_params: auth_placeholder,
                priv_params,
            },
            data,
        };

        let (mut buf, auth_offset) = encode_message(&msg)?;
        if use_auth {
            let protocol = auth_protocol
                .ok_or_else(|| SnmpError::Config("auth credentials missing".to_string()))?;
            let offset = auth_offset
                .ok_or_else(|| SnmpError::Encode("auth offset not produced".to_string()))?;
            let mac = auth_params(protocol, &auth_key, &buf)?;
            buf[offset..offset + mac.len()].copy_from_slice(&mac);
        }

        let response = self.exchange(&buf, msg.msg_id).await?;
        self.decode_response(&response, use_auth, use_priv, &auth_key, &priv_key)
    }

    fn decode_response(
        &mut self,
        buf: &[u8],
        use_auth: bool,
        use_priv: bool,
        auth_key: &[u8],
        priv_key: &[u8],
    ) -> Result<Pdu, SnmpError> {
        let (decoded, auth_loc) = decode_message(buf)?;

        // Reports during key sync may arrive unauthenticated; everything
        // else must carry a valid HMAC when we requested auth.
        let authenticated = decoded.flags_has_auth();
        if use_auth && authenticated {
            let protocol = self
                .target
                .auth
                .as_ref()
                .map(|(p, _)| *p)
                .ok_or_else(|| SnmpError::Config("auth credentials missing".to_string()))?;
            let (offset, len) = auth_loc.ok_or_else(|| {
                SnmpError::Authentication("response missing auth parameters".to_string())
            })?;
            let mut zeroed = buf.to_vec();
            let received = zeroed[offset..offset + len].to_vec();
            zeroed[offset..offset + len].fill(0);
            verify_auth(protocol, auth_key, &zeroed, &received)?;
        }

        let scoped = match decoded.data {
            ScopedData::Plain(scoped) => scoped,
            ScopedData::Encrypted(ciphertext) => {
                if !use_priv {
                    return Err(SnmpError::Privacy(
                        "unexpected encrypted response".to_string(),
                    ));
                }
                let (privacy, _) = self
                    .target
                    .privacy
                    .as_ref()
                    .ok_or_else(|| SnmpError::Config("privacy credentials missing".to_string()))?;
                let plaintext = usm::decrypt(
                    *privacy,
                    priv_key,
                    decoded.usm.engine_boots,
                    decoded.usm.engine_time,
                    &decoded.usm.priv_params,
                    &ciphertext,
                )?;
                crate::message::decode_scoped_pdu(&plaintext)?
            }
        };

        // Track the agent's clock for the privacy IV and time window.
        if let Some(engine) = self.engine.as_mut() {
            if decoded.usm.engine_boots >= engine.boots {
                engine.boots = decoded.usm.engine_boots;
                engine.time_at_sync = decoded.usm.engine_time;
                engine.synced_at = Instant::now();
            }
        }

        Ok(scoped.pdu)
    }

    /// Send and await the response matching `msg_id`, retrying on
    /// timeout up to the target's retry budget.
    async fn exchange(&self, buf: &[u8], msg_id: i32) -> Result<Vec<u8>, SnmpError> {
        let mut recv = vec![0u8; RECV_BUF];
        for _attempt in 0..=self.target.retries {
            self.socket.send(buf).await?;
            let deadline = Instant::now() + self.target.timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, self.socket.recv(&mut recv)).await {
                    Ok(Ok(n)) => {
                        let datagram = &recv[..n];
                        match decode_message(datagram) {
                            Ok((msg, _)) if msg.msg_id == msg_id => {
                                return Ok(datagram.to_vec());
                            }
                            Ok(_) => {
                                // Stale response from a retried request.
                                continue;
                            }
                            Err(e) => {
                                log::debug!("discarding undecodable datagram: {}", e);
                                continue;
                            }
                        }
                    }
                    Ok(Err(e)) => return Err(SnmpError::Io(e)),
                    Err(_) => break,
                }
            }
        }
        Err(SnmpError::Timeout(self.target.retries + 1))
    }
}

impl V3Message {
    fn flags_has_auth(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

fn check_agent_error(pdu: &Pdu) -> Result<(), SnmpError> {
    if pdu.error_status != 0 {
        return Err(SnmpError::AgentError {
            status: pdu.error_status,
            index: pdu.error_index,
        });
    }
    Ok(())
}
