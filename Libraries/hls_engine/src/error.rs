use thiserror::Error;

/// Errors surfaced while fetching or parsing playlists.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to fetch {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Http { url: String, status: u16 },
    #[error("{0} is not an M3U8 playlist")]
    NotHls(String),
    #[error("malformed playlist {url}: {detail}")]
    Parse { url: String, detail: String },
    #[error("master playlist advertises no variant streams")]
    NoVariants,
}
