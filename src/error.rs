use std::path::PathBuf;

/// Errors surfaced by a top-level scan call.
///
/// Failures below the scan root are never reported through this type: the
/// offending entry is dropped from its parent and logged at debug level.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot scan {}: {source}", path.display())]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan cancelled")]
    Cancelled,

    #[error("failed to build scan worker pool: {0}")]
    ThreadPool(String),

    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),
}

/// Errors returned by [`TreeNavigator`](crate::TreeNavigator) operations.
///
/// Every error leaves the navigator's root, current node and breadcrumbs
/// exactly as they were before the call.
#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("no tree loaded")]
    NoTree,

    #[error("node is not part of the loaded tree")]
    UnknownNode,

    #[error("{0} is not a directory")]
    NotAContainer(String),

    #[error("{0} has not been scanned yet")]
    NotExpanded(String),

    #[error("{0} already has children")]
    AlreadyExpanded(String),

    #[error("scan result was superseded by a newer request")]
    StaleScan,
}
