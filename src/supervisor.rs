//! Pipeline wiring and lifecycle supervision.
//!
//! Builds every component from configuration, connects them with
//! bounded channels, and owns the shutdown sequence: signal →
//! cancellation token → bounded drain → exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mk_collectors::arp::{ArpCollector, ArpFeed};
use mk_collectors::modbus::ModbusCollector;
use mk_collectors::netflow::NetflowCollector;
use mk_collectors::opcua::{OpcUaCollector, TcpConnector};
use mk_collectors::snmp::SnmpCollector;
use mk_collectors::syslog::SyslogCollector;
use mk_collectors::{CollectorManager, TelemetrySink};
use mk_correlation::{ActorConfig, ClassifierRules, CorrelationActor, CorrelationEngine, PurdueClassifier};
use mk_db::{zones, Database};
use mk_transport::TransportClient;

use crate::config::AppConfig;
use crate::risk_task::{RiskTask, DEFAULT_RISK_INTERVAL};

const TELEMETRY_CHANNEL: usize = 1024;
const RISK_CHANNEL: usize = 256;
const IP_CACHE_CAPACITY: usize = 100_000;
const DRAIN_WINDOW: Duration = Duration::from_secs(30);

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let db = Arc::new(
        Database::open(&config.database.path, config.database.pool_size)
            .context("opening database")?,
    );

    // Documented zones land in the database so snapshots and the risk
    // sweep see them.
    {
        let conn = db.conn();
        for zone in &config.targets.zones {
            zones::upsert(&conn, zone).context("persisting zone definition")?;
        }
    }

    let transport = match &config.broker {
        Some(broker) => {
            let client = TransportClient::connect(broker.clone(), cancel.clone())
                .await
                .context("connecting to broker")?;
            log::info!("broker session up as {}", client.client_id());
            Some(client)
        }
        None => {
            log::warn!("no broker configured; telemetry stays local");
            None
        }
    };

    let (telemetry_tx, telemetry_rx) = mpsc::channel(TELEMETRY_CHANNEL);
    let (risk_tx, risk_rx) = mpsc::channel(RISK_CHANNEL);
    let sink = TelemetrySink::new(telemetry_tx, transport.clone());

    // Correlation actor.
    let rules = match &config.rules_yaml {
        Some(yaml) => ClassifierRules::from_yaml(yaml).context("classifier rules")?,
        None => ClassifierRules::defaults(),
    };
    let engine = CorrelationEngine::new(
        PurdueClassifier::new(rules),
        config.targets.zones.clone(),
        IP_CACHE_CAPACITY,
    );
    let mut actor = CorrelationActor::new(
        engine,
        db.clone(),
        transport.clone(),
        telemetry_rx,
        Some(risk_tx),
        ActorConfig::default(),
    );
    actor.bootstrap().context("bootstrapping correlation")?;
    let actor_handle = tokio::spawn(actor.run(cancel.clone()));

    // Risk task.
    let risk = RiskTask::new(db.clone(), transport.clone(), risk_rx, DEFAULT_RISK_INTERVAL);
    let risk_handle = tokio::spawn(risk.run(cancel.clone()));

    // Collectors.
    let mut manager = CollectorManager::new(sink).with_drain_window(DRAIN_WINDOW);
    register_collectors(&mut manager, &config)?;
    log::info!(
        "starting {} collectors (snmp targets: {:?})",
        manager.collector_count(),
        config.snmp_hosts()
    );

    let manager_result = manager.run(cancel.clone()).await;
    // Whatever ended the manager (signal or startup failure) ends the
    // rest of the pipeline.
    cancel.cancel();

    let drained = tokio::time::timeout(DRAIN_WINDOW, async {
        let _ = actor_handle.await;
        let _ = risk_handle.await;
    })
    .await;
    if drained.is_err() {
        log::warn!("drain window expired during shutdown");
    }

    if let Some(transport) = transport {
        transport.close().await;
    }
    manager_result.context("collector manager")?;
    log::info!("shutdown complete");
    Ok(())
}

fn register_collectors(
    manager: &mut CollectorManager,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let arp_feed = ArpFeed::new();

    if !config.targets.snmp.is_empty() {
        let collector = SnmpCollector::new(
            config.collector.clone(),
            &config.targets.snmp,
            config.require_auth_priv,
            Some(arp_feed.clone()),
        )
        .context("snmp collector")?;
        manager.register(Box::new(collector));
    }

    let arp = ArpCollector::new(
        config.collector.clone(),
        arp_feed,
        config.discovery_subnets.clone(),
    )
    .context("arp collector")?;
    manager.register(Box::new(arp));

    let netflow = NetflowCollector::new(config.collector.clone(), config.netflow_port)
        .context("netflow collector")?;
    manager.register(Box::new(netflow));

    let syslog = SyslogCollector::new(
        config.collector.clone(),
        config.syslog.protocol,
        config.syslog.port,
    )
    .context("syslog collector")?;
    manager.register(Box::new(syslog));

    if !config.targets.modbus.is_empty() {
        let modbus = ModbusCollector::new(config.collector.clone(), config.targets.modbus.clone())
            .context("modbus collector")?;
        manager.register(Box::new(modbus));
    }

    if let Some(opcua) = &config.targets.opcua {
        let collector = OpcUaCollector::new(
            config.collector.clone(),
            opcua.clone(),
            Arc::new(TcpConnector),
        )
        .context("opcua collector")?;
        manager.register(Box::new(collector));
    }

    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        log::error!("cannot install SIGTERM handler: {e}");
                        let _ = ctrl_c.await;
                        cancel.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => log::info!("SIGINT received, shutting down"),
                _ = sigterm.recv() => log::info!("SIGTERM received, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            log::info!("interrupt received, shutting down");
        }
        cancel.cancel();
    });
}
