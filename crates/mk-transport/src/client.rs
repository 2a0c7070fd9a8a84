//! The broker session: connect, publish, subscribe, reconnect.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::topic::{topic_matches, valid_filter};
use crate::TransportError;

/// Delivery guarantee for a publish. Telemetry defaults to
/// `AtLeastOnce`, alerts to `ExactlyOnce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QosLevel> for QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Observable connection events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    /// One reconnect attempt, carrying its index (1-based).
    Reconnecting { attempt: u32 },
    /// Terminal: the attempt budget is exhausted or the session was
    /// closed deliberately.
    Disconnected,
}

/// A subscription callback. Runs on its own task per message; a panic
/// inside a handler never reaches the dispatch loop.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

struct Subscription {
    filter: String,
    qos: QosLevel,
    handler: MessageHandler,
}

struct Shared {
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<ConnectionEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
    attempt: AtomicU32,
}

/// TLS-authenticated MQTT session shared by collectors and the alert
/// path. Cloneable; all clones share one underlying session.
#[derive(Clone)]
pub struct TransportClient {
    client: AsyncClient,
    shared: Arc<Shared>,
    client_id: String,
    cancel: CancellationToken,
}

impl TransportClient {
    /// Perform the TLS handshake and start the session event loop.
    ///
    /// Fails with `ConnectionFailed` if certificates are missing or
    /// unreadable, or if the initial connect does not complete inside
    /// the configured timeout.
    pub async fn connect(
        config: TransportConfig,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let tls = config.build_tls()?;
        // Child token: closing this session never cancels the caller's
        // token, while app-wide shutdown still propagates down.
        let cancel = cancel.child_token();

        // One id per process: `<app-name>-<short random>`.
        let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
        let client_id = format!("{}-{:06x}", config.app_name, suffix);

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_transport(Transport::Tls(TlsConfiguration::Rustls(tls)));

        let (client, mut eventloop) = AsyncClient::new(options, 128);

        let (state_tx, mut state_rx) = watch::channel(SessionState::Idle);
        let (events_tx, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            state: state_tx,
            events: events_tx,
            subscriptions: Mutex::new(Vec::new()),
            attempt: AtomicU32::new(0),
        });

        let transport = TransportClient {
            client: client.clone(),
            shared: shared.clone(),
            client_id,
            cancel: cancel.clone(),
        };

        shared.state.send_replace(SessionState::Connecting);
        let _ = shared.events.send(ConnectionEvent::Connecting);
        log::info!(
            "connecting to broker {}:{} as {}",
            config.host,
            config.port,
            transport.client_id
        );

        // The event loop owns reconnection: fixed period, bounded
        // attempts, terminal Disconnected on exhaustion.
        let loop_shared = shared.clone();
        let loop_client = client.clone();
        let loop_cancel = cancel.clone();
        let reconnect_period = config.reconnect_period;
        let max_attempts = config.max_reconnect_attempts;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => {
                        loop_shared.state.send_replace(SessionState::Closed);
                        let _ = loop_shared.events.send(ConnectionEvent::Disconnected);
                        break;
                    }
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            loop_shared.attempt.store(0, Ordering::Relaxed);
                            loop_shared.state.send_replace(SessionState::Connected);
                            let _ = loop_shared.events.send(ConnectionEvent::Connected);
                            log::info!("broker session established");
                            resubscribe(&loop_client, &loop_shared).await;
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            dispatch(&loop_shared, &publish.topic, &publish.payload);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let attempt =
                                loop_shared.attempt.fetch_add(1, Ordering::Relaxed) + 1;
                            if attempt > max_attempts {
                                log::error!(
                                    "broker unreachable after {max_attempts} attempts: {e}"
                                );
                                loop_shared.state.send_replace(SessionState::Closed);
                                let _ = loop_shared.events.send(ConnectionEvent::Disconnected);
                                break;
                            }
                            log::warn!(
                                "broker connection lost ({e}), reconnect attempt {attempt}/{max_attempts}"
                            );
                            loop_shared.state.send_replace(SessionState::Reconnecting);
                            let _ = loop_shared
                                .events
                                .send(ConnectionEvent::Reconnecting { attempt });
                            tokio::select! {
                                _ = loop_cancel.cancelled() => {}
                                _ = tokio::time::sleep(reconnect_period) => {}
                            }
                        }
                    }
                }
            }
        });

        // Wait for the first ConnAck (or terminal failure) inside the
        // connect timeout.
        let deadline = tokio::time::Instant::now() + config.connect_timeout;
        loop {
            let current = *state_rx.borrow();
            match current {
                SessionState::Connected => return Ok(transport),
                SessionState::Closed => {
                    return Err(TransportError::ConnectionFailed(
                        "session closed during initial connect".to_string(),
                    ))
                }
                _ => {}
            }
            let changed = tokio::time::timeout_at(deadline, state_rx.changed()).await;
            match changed {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    return Err(TransportError::ConnectionFailed(
                        "event loop terminated".to_string(),
                    ))
                }
                Err(_) => {
                    cancel.cancel();
                    return Err(TransportError::ConnectionFailed(format!(
                        "no ConnAck within {:?}",
                        config.connect_timeout
                    )));
                }
            }
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Publish a payload. Fails with `NotConnected` when the session is
    /// down; QoS 1/2 redelivery is handled by the session layer.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        match self.state() {
            SessionState::Connected => {}
            SessionState::Closed => return Err(TransportError::Closed),
            _ => return Err(TransportError::NotConnected),
        }
        self.client
            .publish(topic, qos.into(), retain, payload)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }

    /// Register a handler for a topic filter (MQTT `+`/`#` wildcards).
    /// The subscription survives reconnects.
    pub async fn subscribe(
        &self,
        filter: &str,
        qos: QosLevel,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        if !valid_filter(filter) {
            return Err(TransportError::BadPattern(filter.to_string()));
        }
        {
            let mut subs = self
                .shared
                .subscriptions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subs.push(Subscription {
                filter: filter.to_string(),
                qos,
                handler,
            });
        }
        if self.state() == SessionState::Connected {
            self.client
                .subscribe(filter, qos.into())
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Close the session deliberately.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self.client.disconnect().await;
    }
}

async fn resubscribe(client: &AsyncClient, shared: &Arc<Shared>) {
    let filters: Vec<(String, QosLevel)> = {
        let subs = shared
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.iter().map(|s| (s.filter.clone(), s.qos)).collect()
    };
    for (filter, qos) in filters {
        if let Err(e) = client.subscribe(&filter, qos.into()).await {
            log::warn!("resubscribe to {filter} failed: {e}");
        }
    }
}

fn dispatch(shared: &Arc<Shared>, topic: &str, payload: &[u8]) {
    let handlers: Vec<MessageHandler> = {
        let subs = shared
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.iter()
            .filter(|s| topic_matches(&s.filter, topic))
            .map(|s| s.handler.clone())
            .collect()
    };
    for handler in handlers {
        let topic = topic.to_string();
        let payload = payload.to_vec();
        // One task per delivery: a panicking handler takes down its own
        // task, never the dispatch loop.
        tokio::spawn(async move {
            handler(&topic, &payload);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(QoS::from(QosLevel::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(QoS::from(QosLevel::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(QosLevel::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_connect_fails_without_certificates() {
        let config = TransportConfig::new(
            "127.0.0.1",
            "/nonexistent/ca.pem",
            "/nonexistent/cert.pem",
            "/nonexistent/key.pem",
            "murakumo",
        );
        let result = TransportClient::connect(config, CancellationToken::new()).await;
        assert!(matches!(result, Err(TransportError::Certificate(_))));
    }
}
