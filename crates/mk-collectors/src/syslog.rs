//! Syslog listener (UDP or TCP).
//!
//! Messages are parsed per RFC 5424 with a tolerant RFC 3164 fallback;
//! unparseable datagrams are dropped with a health-counter increment.
//! Security events get a metadata flag so correlation can raise the
//! matching alert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use mk_model::{TelemetryPayload, TelemetryRecord, TelemetrySource};
use mk_parsers::{alert_severity_for, parse_syslog};

use crate::config::CollectorConfig;
use crate::health::CollectorHealth;
use crate::runtime::Batcher;
use crate::{Collector, CollectorContext, CollectorError};

pub const DEFAULT_SYSLOG_PORT: u16 = 514;
const RECV_BUF: usize = 8192;

/// Listener protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyslogProtocol {
    Udp,
    Tcp,
}

enum Listener {
    Udp(UdpSocket),
    Tcp(TcpListener),
}

pub struct SyslogCollector {
    config: CollectorConfig,
    health: Arc<CollectorHealth>,
    protocol: SyslogProtocol,
    bind_port: u16,
    listener: Option<Listener>,
}

impl SyslogCollector {
    pub fn new(
        config: CollectorConfig,
        protocol: SyslogProtocol,
        bind_port: u16,
    ) -> Result<Self, CollectorError> {
        config.validate()?;
        Ok(SyslogCollector {
            config,
            health: Arc::new(CollectorHealth::new()),
            protocol,
            bind_port,
            listener: None,
        })
    }

    fn record_from_line(&self, line: &str) -> Option<TelemetryRecord> {
        let received_at = Utc::now();
        match parse_syslog(line, received_at) {
            Ok(payload) => {
                let security = payload.security_event;
                let severity = payload.message.severity;
                let mut record =
                    TelemetryRecord::new(TelemetryPayload::Syslog(payload), received_at)
                        .with_raw(line);
                if security {
                    record = record
                        .with_meta("security_event", "true")
                        .with_meta(
                            "alert_severity",
                            format!("{:?}", alert_severity_for(severity)).to_lowercase(),
                        );
                }
                self.health.record_success(received_at);
                Some(record)
            }
            Err(e) => {
                self.health.record_error();
                log::debug!("dropping unparseable syslog message: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl Collector for SyslogCollector {
    fn name(&self) -> &'static str {
        "syslog"
    }

    fn source(&self) -> TelemetrySource {
        TelemetrySource::Syslog
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn health(&self) -> Arc<CollectorHealth> {
        self.health.clone()
    }

    async fn start(&mut self) -> Result<(), CollectorError> {
        self.listener = Some(match self.protocol {
            SyslogProtocol::Udp => {
                let socket = UdpSocket::bind(("0.0.0.0", self.bind_port)).await?;
                log::info!("syslog listener bound on udp/{}", self.bind_port);
                Listener::Udp(socket)
            }
            SyslogProtocol::Tcp => {
                let listener = TcpListener::bind(("0.0.0.0", self.bind_port)).await?;
                log::info!("syslog listener bound on tcp/{}", self.bind_port);
                Listener::Tcp(listener)
            }
        });
        Ok(())
    }

    async fn run(&mut self, ctx: CollectorContext) -> Result<(), CollectorError> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| CollectorError::Config("syslog collector not started".to_string()))?;
        match listener {
            Listener::Udp(socket) => self.run_udp(socket, ctx).await,
            Listener::Tcp(listener) => self.run_tcp(listener, ctx).await,
        }
    }

    async fn stop(&mut self) {
        self.listener = None;
    }
}

impl SyslogCollector {
    async fn run_udp(
        &mut self,
        socket: UdpSocket,
        ctx: CollectorContext,
    ) -> Result<(), CollectorError> {
        let mut batcher = Batcher::new(self.config.batch_size, self.config.flush_interval);
        let mut buf = vec![0u8; RECV_BUF];
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    let remaining = batcher.take();
                    ctx.sink.emit("syslog", TelemetrySource::Syslog, remaining).await?;
                    log::info!("syslog collector stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep_until(batcher.deadline()) => {
                    let batch = batcher.take();
                    ctx.sink.emit("syslog", TelemetrySource::Syslog, batch).await?;
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, _peer)) => {
                            let line = String::from_utf8_lossy(&buf[..n]).into_owned();
                            if let Some(record) = self.record_from_line(&line) {
                                batcher.push(record);
                            }
                        }
                        Err(e) => {
                            self.health.record_error();
                            log::warn!("syslog receive error: {e}");
                        }
                    }
                    if batcher.is_full() {
                        let batch = batcher.take();
                        ctx.sink.emit("syslog", TelemetrySource::Syslog, batch).await?;
                    }
                }
            }
        }
    }

    async fn run_tcp(
        &mut self,
        listener: TcpListener,
        ctx: CollectorContext,
    ) -> Result<(), CollectorError> {
        let mut batcher = Batcher::new(self.config.batch_size, self.config.flush_interval);
        // Per-connection reader tasks feed lines through this channel.
        let (line_tx, mut line_rx) = mpsc::channel::<String>(1024);

        let accept_cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let tx = line_tx.clone();
                            let conn_cancel = accept_cancel.clone();
                            tokio::spawn(async move {
                                let mut lines = tokio::io::BufReader::new(stream).lines();
                                loop {
                                    tokio::select! {
                                        _ = conn_cancel.cancelled() => break,
                                        line = lines.next_line() => match line {
                                            Ok(Some(line)) => {
                                                if tx.send(line).await.is_err() {
                                                    break;
                                                }
                                            }
                                            Ok(None) => break,
                                            Err(e) => {
                                                log::debug!("syslog TCP read from {peer}: {e}");
                                                break;
                                            }
                                        }
                                    }
                                }
                            });
                        }
                        Err(e) => log::warn!("syslog accept error: {e}"),
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    let remaining = batcher.take();
                    ctx.sink.emit("syslog", TelemetrySource::Syslog, remaining).await?;
                    log::info!("syslog collector stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep_until(batcher.deadline()) => {
                    let batch = batcher.take();
                    ctx.sink.emit("syslog", TelemetrySource::Syslog, batch).await?;
                }
                line = line_rx.recv() => match line {
                    Some(line) => {
                        if let Some(record) = self.record_from_line(&line) {
                            batcher.push(record);
                        }
                        if batcher.is_full() {
                            let batch = batcher.take();
                            ctx.sink.emit("syslog", TelemetrySource::Syslog, batch).await?;
                        }
                    }
                    // Closed channel: the accept task exited on
                    // cancellation. Park until the cancelled arm runs.
                    None => ctx.cancel.cancelled().await,
                }
            }
        }
    }
}
