//! netflow-v5-collector standalone binary

use anyhow::Context;
use netflow_v5_collector::ingest::{IngestMetrics, Listener, ListenerOptions};
use netflow_v5_collector::plugin_config::PluginConfig;
use netflow_v5_collector::sink::SharedSink;
use netflow_v5_collector::traffic::{self, TrafficMonitors};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    rt::init_tracing("info");

    let config = match PluginConfig::new() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!("failed to load configuration: {err:#}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        tracing::error!("netflow collector error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(config: PluginConfig) -> anyhow::Result<()> {
    let options = ListenerOptions {
        max_packet_size: config.listener.max_packet_size,
        receive_buffer: config.listener.receive_buffer,
    };

    let mut listeners = Vec::new();
    for addr in config.listen_addrs()? {
        let listener = Listener::bind(addr, &options)
            .await
            .with_context(|| format!("failed to start listener on {addr}"))?;
        listeners.push(listener);
    }

    let monitors = SharedSink::new(TrafficMonitors::new(&config.monitored_traffic));
    tracing::info!(
        "{}: {} listener(s), {} monitored traffic sensor(s)",
        config.name,
        listeners.len(),
        monitors.with(|m| m.len())
    );

    let shutdown = CancellationToken::new();
    let mut metrics: Vec<Arc<IngestMetrics>> = Vec::new();
    let mut tasks = JoinSet::new();
    for listener in listeners {
        metrics.push(listener.metrics());
        let addr = listener.local_addr();
        let sink = monitors.clone();
        let token = shutdown.clone();
        tasks.spawn(async move { (addr, listener.run(sink, token).await) });
    }

    let mut report_tick = tokio::time::interval(config.listener.report_interval);
    report_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut result = Ok(());
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    tracing::warn!("failed to wait for ctrl-c: {}", err);
                }
                tracing::info!("shutdown requested");
                break;
            }
            _ = report_tick.tick() => {
                report(&config.name, &monitors, &metrics);
            }
            joined = tasks.join_next() => {
                match joined {
                    Some(Ok((addr, Ok(())))) => {
                        tracing::info!("listener on {} exited", addr);
                    }
                    Some(Ok((addr, Err(err)))) => {
                        result = Err(anyhow::Error::new(err)
                            .context(format!("listener on {addr} failed")));
                        break;
                    }
                    Some(Err(err)) => {
                        result = Err(anyhow::anyhow!("listener task join error: {err}"));
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    shutdown.cancel();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((addr, Err(err))) => {
                tracing::warn!("listener on {} failed during shutdown: {}", addr, err);
            }
            Err(err) if !err.is_cancelled() => {
                tracing::warn!("listener task join error: {}", err);
            }
            _ => {}
        }
    }
    report(&config.name, &monitors, &metrics);

    result
}

fn report(name: &str, monitors: &SharedSink<TrafficMonitors>, metrics: &[Arc<IngestMetrics>]) {
    let reports = monitors.with(|m| {
        m.flush_closed(traffic::now_usec());
        m.reports()
    });

    for sensor in reports {
        tracing::info!(
            packets = sensor.totals.packets,
            bytes = sensor.totals.bytes,
            flows = sensor.totals.flows,
            exceeded = sensor.exceeded,
            "{} {}",
            name,
            sensor.name
        );
    }

    for snapshot in metrics.iter().map(|m| m.snapshot()) {
        let mut stats: Vec<_> = snapshot.into_iter().collect();
        stats.sort();
        tracing::debug!("listener stats: {:?}", stats);
    }
}
