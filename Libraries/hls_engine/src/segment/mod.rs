pub mod fetcher;

pub use fetcher::{fetch_segment, FetchError, ThroughputEstimator};
