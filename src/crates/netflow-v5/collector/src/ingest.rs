use crate::decoder::{self, DecodeError};
use crate::sink::FlowSink;
use netflow_plugin_error::{NetflowPluginError, Result, is_transient_io};
use socket2::SockRef;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Largest datagram read per receive, matching an Ethernet MTU.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1500;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub udp_packets_received: AtomicU64,
    pub udp_bytes_received: AtomicU64,
    pub udp_recv_errors: AtomicU64,
    pub decoded_datagrams: AtomicU64,
    pub records_emitted: AtomicU64,
    pub version_errors: AtomicU64,
    pub header_errors: AtomicU64,
    pub truncated_datagrams: AtomicU64,
}

impl IngestMetrics {
    fn record_decode_error(&self, err: &DecodeError) {
        let counter = match err {
            DecodeError::UnsupportedVersion(_) => &self.version_errors,
            DecodeError::HeaderTooShort { .. } | DecodeError::InvalidRecordCount(_) => {
                &self.header_errors
            }
            DecodeError::TruncatedRecords { .. } => &self.truncated_datagrams,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        let mut stats = HashMap::new();
        for (name, counter) in [
            ("udp_packets_received", &self.udp_packets_received),
            ("udp_bytes_received", &self.udp_bytes_received),
            ("udp_recv_errors", &self.udp_recv_errors),
            ("decoded_datagrams", &self.decoded_datagrams),
            ("records_emitted", &self.records_emitted),
            ("decode_version_errors", &self.version_errors),
            ("decode_header_errors", &self.header_errors),
            ("decode_truncated_datagrams", &self.truncated_datagrams),
        ] {
            stats.insert(name.to_string(), counter.load(Ordering::Relaxed));
        }
        stats
    }
}

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub max_packet_size: usize,
    /// Requested kernel receive buffer in bytes; 0 leaves the default.
    pub receive_buffer: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            receive_buffer: 0,
        }
    }
}

/// A bound UDP socket receiving NetFlow v5 datagrams.
pub struct Listener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    max_packet_size: usize,
    metrics: Arc<IngestMetrics>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, options: &ListenerOptions) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetflowPluginError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;

        if options.receive_buffer > 0 {
            set_receive_buffer(&socket, local_addr, options.receive_buffer);
        }

        tracing::info!("listening for netflow v5 on {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            max_packet_size: options.max_packet_size.max(decoder::HEADER_SIZE),
            metrics: Arc::new(IngestMetrics::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Receive, decode and emit until `shutdown` is cancelled or the socket fails.
    ///
    /// Malformed datagrams are counted, logged and skipped.
    pub async fn run<S: FlowSink>(self, mut sink: S, shutdown: CancellationToken) -> Result<()> {
        let mut buffer = vec![0_u8; self.max_packet_size];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                recv = self.socket.recv_from(&mut buffer) => {
                    let (received, source) = match recv {
                        Ok(result) => result,
                        Err(err) if is_transient_io(&err) => {
                            self.metrics.udp_recv_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("udp recv error on {}: {}", self.local_addr, err);
                            continue;
                        }
                        Err(err) => {
                            tracing::error!("udp socket {} failed: {}", self.local_addr, err);
                            return Err(NetflowPluginError::Transport(err));
                        }
                    };

                    if received == 0 {
                        continue;
                    }

                    self.metrics.udp_packets_received.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .udp_bytes_received
                        .fetch_add(received as u64, Ordering::Relaxed);

                    self.process_datagram(source, &buffer[..received], &mut sink);
                }
            }
        }

        tracing::info!("netflow listener on {} stopped", self.local_addr);
        Ok(())
    }

    fn process_datagram<S: FlowSink>(&self, source: SocketAddr, payload: &[u8], sink: &mut S) {
        let datagram = match decoder::parse_datagram(payload) {
            Ok(datagram) => datagram,
            Err(err) => {
                self.metrics.record_decode_error(&err);
                tracing::warn!(
                    exporter = %source,
                    kind = err.kind(),
                    "discarding datagram: {}",
                    err
                );
                return;
            }
        };

        if let Some(err) = datagram.truncation() {
            self.metrics.record_decode_error(&err);
            tracing::warn!(exporter = %source, kind = err.kind(), "{}", err);
        }
        self.metrics.decoded_datagrams.fetch_add(1, Ordering::Relaxed);

        for record in datagram.records {
            tracing::debug!(exporter = %source, "{}", record);
            sink.emit(source, record);
            self.metrics.records_emitted.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Bind `0.0.0.0:port` and feed `sink` until the socket fails.
pub async fn listen<S: FlowSink>(port: u16, sink: S) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = Listener::bind(addr, &ListenerOptions::default()).await?;
    listener.run(sink, CancellationToken::new()).await
}

fn set_receive_buffer(socket: &UdpSocket, local_addr: SocketAddr, requested: usize) {
    let sock = SockRef::from(socket);
    if let Err(err) = sock.set_recv_buffer_size(requested) {
        tracing::warn!(
            "failed to set receive buffer on {} (requested {} bytes): {}",
            local_addr,
            requested,
            err
        );
        return;
    }

    match sock.recv_buffer_size() {
        Ok(actual) if actual < requested => {
            tracing::warn!(
                "receive buffer on {} is {} bytes, requested {}",
                local_addr,
                actual,
                requested
            );
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!("failed to read receive buffer size on {}: {}", local_addr, err);
        }
    }
}
