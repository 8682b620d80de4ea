use crate::decoder::{FlowRecord, PROTOCOL_TCP, PROTOCOL_UDP};
use crate::plugin_config::{TrafficMonitorConfig, TrafficProtocol};
use crate::sink::FlowSink;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

const USEC_PER_SEC: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficTotals {
    pub packets: u64,
    pub bytes: u64,
    pub flows: u64,
}

impl TrafficTotals {
    fn add(&mut self, record: &FlowRecord) {
        self.packets = self.packets.saturating_add(u64::from(record.packet_count));
        self.bytes = self.bytes.saturating_add(u64::from(record.byte_count));
        self.flows = self.flows.saturating_add(1);
    }
}

/// State of one monitor for one closed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficReport {
    pub name: String,
    pub window_start_usec: u64,
    pub window_end_usec: u64,
    pub totals: TrafficTotals,
    /// A configured packet or byte threshold was reached in the window.
    pub exceeded: bool,
}

#[derive(Debug)]
struct TrafficMonitor {
    cfg: TrafficMonitorConfig,
    window_usec: u64,
    buckets: BTreeMap<u64, TrafficTotals>,
    latest: Option<TrafficReport>,
}

impl TrafficMonitor {
    fn new(cfg: TrafficMonitorConfig) -> Self {
        let window_usec = cfg.deltatime.max(1).saturating_mul(USEC_PER_SEC);
        Self {
            cfg,
            window_usec,
            buckets: BTreeMap::new(),
            latest: None,
        }
    }

    fn matches(&self, record: &FlowRecord) -> bool {
        let cfg = &self.cfg;
        cfg.saddr.is_none_or(|addr| addr == record.src_addr)
            && cfg.daddr.is_none_or(|addr| addr == record.dst_addr)
            && cfg.sport.is_none_or(|port| port == record.src_port)
            && cfg.dport.is_none_or(|port| port == record.dst_port)
            && cfg.protocol.is_none_or(|protocol| match protocol {
                TrafficProtocol::Tcp => record.protocol == PROTOCOL_TCP,
                TrafficProtocol::Udp => record.protocol == PROTOCOL_UDP,
            })
    }

    fn observe(&mut self, timestamp_usec: u64, record: &FlowRecord) {
        if !self.matches(record) {
            return;
        }
        let start = bucket_start_usec(timestamp_usec, self.window_usec);
        self.buckets.entry(start).or_default().add(record);
    }

    fn report(&self, start: u64, totals: TrafficTotals) -> TrafficReport {
        let exceeded = self
            .cfg
            .packet_count
            .is_some_and(|limit| totals.packets >= limit)
            || self
                .cfg
                .bytes_count
                .is_some_and(|limit| totals.bytes >= limit);

        TrafficReport {
            name: self.cfg.name.clone(),
            window_start_usec: start,
            window_end_usec: start.saturating_add(self.window_usec),
            totals,
            exceeded,
        }
    }

    fn flush_closed(&mut self, now_usec: u64) -> Vec<TrafficReport> {
        let open_start = bucket_start_usec(now_usec, self.window_usec);
        let open = self.buckets.split_off(&open_start);
        let closed = std::mem::replace(&mut self.buckets, open);

        let reports: Vec<_> = closed
            .into_iter()
            .map(|(start, totals)| self.report(start, totals))
            .collect();

        // The sensor shows the window right before the open one, zero if it saw no traffic.
        if let Some(previous_start) = open_start.checked_sub(self.window_usec) {
            let already_current = self
                .latest
                .as_ref()
                .is_some_and(|r| r.window_start_usec == previous_start);
            if let Some(report) = reports
                .iter()
                .find(|r| r.window_start_usec == previous_start)
            {
                self.latest = Some(report.clone());
            } else if !already_current {
                self.latest = Some(self.report(previous_start, TrafficTotals::default()));
            }
        }

        reports
    }

    fn latest_report(&self) -> TrafficReport {
        self.latest
            .clone()
            .unwrap_or_else(|| TrafficReport {
                name: self.cfg.name.clone(),
                window_start_usec: 0,
                window_end_usec: 0,
                totals: TrafficTotals::default(),
                exceeded: false,
            })
    }
}

/// The configured monitored-traffic sensors.
#[derive(Debug, Default)]
pub struct TrafficMonitors {
    monitors: Vec<TrafficMonitor>,
}

impl TrafficMonitors {
    pub fn new(configs: &[TrafficMonitorConfig]) -> Self {
        Self {
            monitors: configs.iter().cloned().map(TrafficMonitor::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn observe_at(&mut self, timestamp_usec: u64, record: &FlowRecord) {
        for monitor in &mut self.monitors {
            monitor.observe(timestamp_usec, record);
        }
    }

    /// Close every window that ended at or before `now_usec`.
    ///
    /// Returns the reports of closed windows that saw traffic.
    pub fn flush_closed(&mut self, now_usec: u64) -> Vec<TrafficReport> {
        self.monitors
            .iter_mut()
            .flat_map(|monitor| monitor.flush_closed(now_usec))
            .collect()
    }

    /// Latest closed-window report of every monitor, in configuration order.
    pub fn reports(&self) -> Vec<TrafficReport> {
        self.monitors
            .iter()
            .map(TrafficMonitor::latest_report)
            .collect()
    }
}

impl FlowSink for TrafficMonitors {
    fn emit(&mut self, exporter: SocketAddr, record: FlowRecord) {
        tracing::trace!(exporter = %exporter, "{}", record);
        self.observe_at(now_usec(), &record);
    }
}

fn bucket_start_usec(timestamp_usec: u64, bucket_usec: u64) -> u64 {
    timestamp_usec - (timestamp_usec % bucket_usec)
}

pub fn now_usec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
