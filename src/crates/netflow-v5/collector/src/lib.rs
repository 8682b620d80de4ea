//! NetFlow v5 collector.
//!
//! [`decoder`] turns raw UDP payloads into [`FlowRecord`] values, [`ingest`]
//! runs the UDP receive loop that feeds them to a [`FlowSink`], and
//! [`traffic`] aggregates records into the monitored-traffic sensors.

pub mod decoder;
pub mod ingest;
pub mod plugin_config;
pub mod sink;
pub mod traffic;

pub use decoder::{
    Datagram, DecodeError, FlowHeader, FlowRecord, decode_datagram, parse_datagram,
};
pub use ingest::{IngestMetrics, Listener, ListenerOptions, listen};
pub use sink::{FlowSink, SharedSink, from_fn};
pub use traffic::{TrafficMonitors, TrafficReport, TrafficTotals};
