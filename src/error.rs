/// The failure kinds an operator needs to tell apart. These get wrapped into
/// a `stacked_errors::Error` with `.stack()` at the point they are raised, so
/// that callers can keep adding context the usual way.
#[derive(Debug, thiserror::Error)]
pub enum BuddyError {
    /// A required option (usually the docker machine name) is missing
    #[error("configuration error: {0}")]
    Config(String),
    #[error("could not resolve the latest revision of {repo}: {reason}")]
    RevisionResolution { repo: String, reason: String },
    #[error("building image \"{tag}\" failed: {message}")]
    BuildFailed { tag: String, message: String },
    #[error("database at {host}:{port} is unreachable after {attempts} attempts")]
    DatabaseUnreachable {
        host: String,
        port: u16,
        attempts: u32,
    },
    #[error("invalid dataset manifest: {0}")]
    InvalidManifest(String),
}

