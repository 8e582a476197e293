use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{error, warn};

/// Per-session tile counters. Each session owns its registry so several
/// sessions can live in one process.
#[derive(Clone)]
pub struct SessionMetrics {
    registry: Registry,
    frames_produced: IntCounterVec,
    frames_consumed: IntCounterVec,
    representation: IntGaugeVec,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let frames_produced = counter_vec(
            &registry,
            "tile_frames_produced_total",
            "Total number of decoded frames queued per tile",
        );
        let frames_consumed = counter_vec(
            &registry,
            "tile_frames_consumed_total",
            "Total number of frames consumed per tile",
        );
        let representation = IntGaugeVec::new(
            Opts::new("tile_representation_index", "Representation index of the last requested segment"),
            &["tile"],
        )
        .expect("Failed to create tile_representation_index gauge");
        register(&registry, Box::new(representation.clone()));

        Self {
            registry,
            frames_produced,
            frames_consumed,
            representation,
        }
    }

    pub fn frame_produced(&self, tile_index: u32) {
        self.frames_produced.with_label_values(&[tile_index.to_string().as_str()]).inc();
    }

    pub fn frame_consumed(&self, tile_index: u32) {
        self.frames_consumed.with_label_values(&[tile_index.to_string().as_str()]).inc();
    }

    pub fn representation_selected(&self, tile_index: u32, representation_index: usize) {
        self.representation
            .with_label_values(&[tile_index.to_string().as_str()])
            .set(representation_index as i64);
    }

    pub fn frames_produced(&self, tile_index: u32) -> u64 {
        self.frames_produced.with_label_values(&[tile_index.to_string().as_str()]).get()
    }

    pub fn frames_consumed(&self, tile_index: u32) -> u64 {
        self.frames_consumed.with_label_values(&[tile_index.to_string().as_str()]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every metric in the Prometheus text format.
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), &["tile"])
        .expect("Failed to create tile counter");
    register(registry, Box::new(counter.clone()));
    counter
}

fn register(registry: &Registry, collector: Box<dyn prometheus::core::Collector>) {
    if let Err(e) = registry.register(collector) {
        warn!("Failed to register metric: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_labelled_by_tile() {
        let metrics = SessionMetrics::new();
        metrics.frame_produced(1);
        metrics.frame_produced(1);
        metrics.frame_consumed(1);
        metrics.representation_selected(2, 3);

        assert_eq!(metrics.frames_produced(1), 2);
        assert_eq!(metrics.frames_consumed(1), 1);
        assert_eq!(metrics.frames_produced(2), 0);

        let text = metrics.gather();
        assert!(text.contains(r#"tile_frames_produced_total{tile="1"} 2"#), "{text}");
        assert!(text.contains(r#"tile_representation_index{tile="2"} 3"#), "{text}");
    }

    #[test]
    fn sessions_do_not_share_registries() {
        let a = SessionMetrics::new();
        let b = SessionMetrics::new();
        a.frame_produced(1);
        assert_eq!(b.frames_produced(1), 0);
    }
}
