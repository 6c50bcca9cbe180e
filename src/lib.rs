//! Disk-usage scanning, navigation and treemap layout.
//!
//! [`Scanner`] walks a directory on a bounded worker pool and produces a
//! size-ranked tree, [`TreeNavigator`] owns that tree together with the
//! current view and breadcrumbs, and [`BandTreemap`] turns the children of
//! the current view into rectangles.

pub mod config;
pub mod error;
pub mod navigator;
pub mod scanner;
pub mod tree;
pub mod treemap;

pub use config::ScanConfig;
pub use error::{NavError, ScanError};
pub use navigator::{CompletedScan, PendingScan, ScanTarget, TreeNavigator};
pub use scanner::{CancelFlag, ScanOutput, ScanStats, ScannedNode, Scanner};
pub use tree::{Entry, NodeId, ScanState, SizeTree};
pub use treemap::{BandTreemap, LayoutRect, Rect, TreemapItem, TreemapLayout};
