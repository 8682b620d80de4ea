//! Destinations for decoded flow records.

use crate::decoder::FlowRecord;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

/// Receives decoded records, one at a time, in datagram order.
///
/// `exporter` is the UDP source address of the datagram the record came from.
pub trait FlowSink: Send {
    fn emit(&mut self, exporter: SocketAddr, record: FlowRecord);
}

/// Sink backed by a closure, see [`from_fn`].
pub struct FnSink<F>(F);

/// Wrap a closure as a [`FlowSink`].
pub fn from_fn<F>(f: F) -> FnSink<F>
where
    F: FnMut(SocketAddr, FlowRecord) + Send,
{
    FnSink(f)
}

impl<F> FlowSink for FnSink<F>
where
    F: FnMut(SocketAddr, FlowRecord) + Send,
{
    fn emit(&mut self, exporter: SocketAddr, record: FlowRecord) {
        (self.0)(exporter, record)
    }
}

impl FlowSink for UnboundedSender<(SocketAddr, FlowRecord)> {
    fn emit(&mut self, exporter: SocketAddr, record: FlowRecord) {
        if self.send((exporter, record)).is_err() {
            tracing::debug!("flow receiver dropped, discarding record from {}", exporter);
        }
    }
}

/// A sink shared by several listeners. Emission is serialized by a mutex.
pub struct SharedSink<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> SharedSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    /// Run `f` with exclusive access to the wrapped sink.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl<S> Clone for SharedSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: FlowSink> FlowSink for SharedSink<S> {
    fn emit(&mut self, exporter: SocketAddr, record: FlowRecord) {
        self.with(|sink| sink.emit(exporter, record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::sample_record;

    fn exporter() -> SocketAddr {
        "192.0.2.10:40000".parse().expect("valid socket address")
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = from_fn(|_, record: FlowRecord| seen.push(record.packet_count));
            sink.emit(exporter(), sample_record(0));
            sink.emit(exporter(), sample_record(4));
        }
        assert_eq!(seen, vec![1, 5]);
    }

    #[test]
    fn channel_sink_forwards_in_order() {
        let (mut tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.emit(exporter(), sample_record(1));
        tx.emit(exporter(), sample_record(2));

        assert_eq!(rx.try_recv().expect("first record").1, sample_record(1));
        assert_eq!(rx.try_recv().expect("second record").1, sample_record(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (mut tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        tx.emit(exporter(), sample_record(0));
    }

    #[test]
    fn shared_sink_clones_feed_one_target() {
        let shared = SharedSink::new(Vec::<FlowRecord>::new());
        let mut a = shared.clone();
        let mut b = shared.clone();

        let handles = [
            std::thread::spawn(move || {
                for i in 0..50 {
                    a.emit(exporter(), sample_record(i));
                }
            }),
            std::thread::spawn(move || {
                for i in 50..100 {
                    b.emit(exporter(), sample_record(i));
                }
            }),
        ];
        for handle in handles {
            handle.join().expect("emitter thread");
        }

        assert_eq!(shared.with(|records| records.len()), 100);
    }

    impl FlowSink for Vec<FlowRecord> {
        fn emit(&mut self, _exporter: SocketAddr, record: FlowRecord) {
            self.push(record);
        }
    }
}
