pub mod fetcher;
pub mod memory;

pub use fetcher::{fetch_manifest, fetch_segment, resolve_segment_url, BandwidthEstimator, HttpTransport, Transport};
pub use memory::MemoryTransport;
