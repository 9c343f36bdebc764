//! Observability wrapper (spec section 4.H): spans and metrics around
//! any [`Quantizer`], transparent when no collector is attached.

use std::time::Instant;

use tracing::{info_span, Span};

use crate::error::Result;

use super::{QuantizedVectors, Quantizer};

/// Sink for counters/histograms/gauges emitted around codec calls.
/// `Option<Arc<dyn MetricsCollector>>` at the call site models "nil
/// collector forwards directly" the same way a `None` tracer would.
pub trait MetricsCollector: Send + Sync {
    fn increment_counter(&self, operation: &'static str, status: &'static str);
    fn record_duration(&self, operation: &'static str, duration_ms: f64);
    fn record_gauge(&self, name: &'static str, value: f64);
}

/// Wraps any [`Quantizer`], opening a span and feeding a
/// [`MetricsCollector`] around each call. With no collector attached
/// this is a pure passthrough — the inner codec's cost is the only cost.
pub struct ObservableQuantizer<Q: Quantizer> {
    inner: Q,
    collector: Option<Box<dyn MetricsCollector>>,
}

impl<Q: Quantizer> ObservableQuantizer<Q> {
    pub fn new(inner: Q) -> Self {
        Self { inner, collector: None }
    }

    pub fn with_collector(mut self, collector: Box<dyn MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    fn span(&self, operation: &'static str, count: usize) -> Span {
        info_span!("quantizer_call", codec = self.inner.quantizer_type(), operation, vector_count = count)
    }

    fn finish(&self, operation: &'static str, started: Instant, status: &'static str) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Some(collector) = &self.collector {
            collector.increment_counter(operation, status);
            collector.record_duration(operation, elapsed_ms);
            collector.record_gauge("compression_ratio", self.inner.compression_ratio());
        }
    }
}

impl<Q: Quantizer> Quantizer for ObservableQuantizer<Q> {
    fn quantizer_type(&self) -> &'static str {
        self.inner.quantizer_type()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn is_trained(&self) -> bool {
        self.inner.is_trained()
    }

    fn compression_ratio(&self) -> f64 {
        self.inner.compression_ratio()
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        let _span = self.span("train", vectors.len()).entered();
        let started = Instant::now();
        let result = self.inner.train(vectors);
        self.finish("train", started, if result.is_ok() { "ok" } else { "error" });
        result
    }

    fn encode(&self, vectors: &[Vec<f32>]) -> Result<QuantizedVectors> {
        let _span = self.span("encode", vectors.len()).entered();
        let started = Instant::now();
        let result = self.inner.encode(vectors);
        self.finish("encode", started, if result.is_ok() { "ok" } else { "error" });
        result
    }

    fn decode(&self, qv: &QuantizedVectors) -> Result<Vec<Vec<f32>>> {
        let _span = self.span("decode", qv.len()).entered();
        let started = Instant::now();
        let result = self.inner.decode(qv);
        self.finish("decode", started, if result.is_ok() { "ok" } else { "error" });
        result
    }

    fn compute_distance(&self, query: &[f32], candidates: &QuantizedVectors) -> Result<Vec<f32>> {
        let _span = self.span("compute_distance", candidates.len()).entered();
        let started = Instant::now();
        let result = self.inner.compute_distance(query, candidates);
        self.finish("compute_distance", started, if result.is_ok() { "ok" } else { "error" });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::scalar::{ScalarBits, ScalarMode, ScalarQuantizer};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingCollector {
        counters: Mutex<Vec<(&'static str, &'static str)>>,
    }

    impl MetricsCollector for Arc<RecordingCollector> {
        fn increment_counter(&self, operation: &'static str, status: &'static str) {
            self.counters.lock().push((operation, status));
        }
        fn record_duration(&self, _operation: &'static str, _duration_ms: f64) {}
        fn record_gauge(&self, _name: &'static str, _value: f64) {}
    }

    #[test]
    fn passthrough_without_collector_still_trains_and_encodes() {
        let inner = ScalarQuantizer::new(2, ScalarBits::Eight, ScalarMode::Asymmetric);
        let mut wrapped = ObservableQuantizer::new(inner);
        wrapped.train(&[vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        assert!(wrapped.is_trained());
        let encoded = wrapped.encode(&[vec![0.5, 0.5]]).unwrap();
        assert_eq!(encoded.len(), 1);
    }

    #[test]
    fn collector_observes_every_call() {
        let collector = Arc::new(RecordingCollector::default());
        let inner = ScalarQuantizer::new(2, ScalarBits::Eight, ScalarMode::Asymmetric);
        let mut wrapped = ObservableQuantizer::new(inner).with_collector(Box::new(Arc::clone(&collector)));

        wrapped.train(&[vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        wrapped.encode(&[vec![0.5, 0.5]]).unwrap();

        let recorded = collector.counters.lock();
        assert_eq!(recorded.len(), 2);
        assert!(recorded.iter().all(|(_, status)| *status == "ok"));
    }
}
