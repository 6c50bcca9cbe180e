use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{NavError, ScanError};
use crate::scanner::{CancelFlag, ScanOutput, ScanStats, Scanner};
use crate::tree::{Entry, NodeId, ScanState, SizeTree};

/// What a [`PendingScan`] will do with its result once it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// Replace the whole tree.
    Root,
    /// Splice into the directory with this full path.
    Expand { full_path: String },
}

/// A scan issued by the navigator that has not run yet.
///
/// It can be run on any thread; hand the [`CompletedScan`] back to
/// [`TreeNavigator::complete`]. Issuing another request cancels this one.
pub struct PendingScan {
    generation: u64,
    target: ScanTarget,
    location: PathBuf,
    parent_path: String,
    cancel: CancelFlag,
    scanner: Arc<Scanner>,
}

impl PendingScan {
    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Blocks until the whole subtree has been scanned.
    pub fn run(self) -> CompletedScan {
        let result = self
            .scanner
            .scan_with_cancel(&self.location, &self.parent_path, &self.cancel);
        CompletedScan {
            generation: self.generation,
            target: self.target,
            result,
        }
    }
}

pub struct CompletedScan {
    generation: u64,
    target: ScanTarget,
    result: Result<ScanOutput, ScanError>,
}

impl CompletedScan {
    pub fn target(&self) -> &ScanTarget {
        &self.target
    }
}

/// Owns the scanned tree plus the current view and breadcrumb trail.
///
/// `breadcrumbs` always starts at the root and ends at `current` once a tree
/// is loaded. Every operation either succeeds completely or leaves the tree,
/// the current node and the breadcrumbs untouched.
pub struct TreeNavigator {
    scanner: Arc<Scanner>,
    tree: Option<SizeTree>,
    current: Option<NodeId>,
    breadcrumbs: Vec<NodeId>,
    generation: u64,
    in_flight: Option<CancelFlag>,
}

impl TreeNavigator {
    pub fn new(scanner: Arc<Scanner>) -> Self {
        Self {
            scanner,
            tree: None,
            current: None,
            breadcrumbs: Vec::new(),
            generation: 0,
            in_flight: None,
        }
    }

    pub fn tree(&self) -> Option<&SizeTree> {
        self.tree.as_ref()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.tree.as_ref().map(SizeTree::root)
    }

    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    pub fn breadcrumbs(&self) -> &[NodeId] {
        &self.breadcrumbs
    }

    pub fn node(&self, id: NodeId) -> Option<&Entry> {
        self.tree.as_ref()?.get(id)
    }

    pub fn current_entry(&self) -> Option<&Entry> {
        self.node(self.current?)
    }

    /// Children of the current node, largest first.
    pub fn current_children(&self) -> Vec<NodeId> {
        match (self.tree.as_ref(), self.current) {
            (Some(tree), Some(current)) => tree.children(current).collect(),
            _ => Vec::new(),
        }
    }

    pub fn find_by_path(&self, full_path: &str) -> Option<NodeId> {
        self.tree.as_ref()?.find_by_path(full_path)
    }

    /// Whether a request has been issued and not yet completed or cancelled.
    pub fn is_scanning(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Scan `location` and make it the new root.
    pub fn load_root(&mut self, location: impl AsRef<Path>) -> Result<ScanStats, NavError> {
        let pending = self.request_root(location);
        self.complete(pending.run())
    }

    /// Scan an unexpanded directory, splice its children in and enter it.
    pub fn expand(&mut self, id: NodeId) -> Result<ScanStats, NavError> {
        let pending = self.request_expand(id)?;
        self.complete(pending.run())
    }

    /// Make a directory the current node.
    ///
    /// Entering a node already on the breadcrumb trail truncates the trail
    /// back to it; entering any other node appends it.
    pub fn enter(&mut self, id: NodeId) -> Result<(), NavError> {
        let entry = self.container(id)?;
        if entry.state == ScanState::Unscanned {
            return Err(NavError::NotExpanded(entry.full_path.clone()));
        }
        self.cancel_pending();
        self.navigate(id);
        Ok(())
    }

    /// Enter `id`, expanding it first if it has never been scanned.
    ///
    /// Returns the scan statistics when a scan was needed.
    pub fn open(&mut self, id: NodeId) -> Result<Option<ScanStats>, NavError> {
        let entry = self.container(id)?;
        if entry.state == ScanState::Unscanned {
            return self.expand(id).map(Some);
        }
        self.enter(id).map(|()| None)
    }

    /// Go to the previous breadcrumb. Returns false when already at the root.
    pub fn up(&mut self) -> bool {
        if self.breadcrumbs.len() < 2 {
            return false;
        }
        let parent = self.breadcrumbs[self.breadcrumbs.len() - 2];
        self.enter(parent).is_ok()
    }

    /// Go back to the root.
    pub fn home(&mut self) -> bool {
        match self.root() {
            Some(root) => self.enter(root).is_ok(),
            None => false,
        }
    }

    /// Issue a scan that will replace the whole tree once completed.
    pub fn request_root(&mut self, location: impl AsRef<Path>) -> PendingScan {
        self.issue(ScanTarget::Root, location.as_ref().to_path_buf(), String::new())
    }

    /// Issue a scan of a directory whose children are not loaded.
    pub fn request_expand(&mut self, id: NodeId) -> Result<PendingScan, NavError> {
        let tree = self.tree.as_ref().ok_or(NavError::NoTree)?;
        let entry = self.container(id)?;
        if tree.has_children(id) {
            return Err(NavError::AlreadyExpanded(entry.full_path.clone()));
        }

        // Re-scanning the directory itself under its own parent path makes the
        // fresh full paths line up with the existing ones.
        let parent_path = tree
            .parent(id)
            .and_then(|parent| tree.get(parent))
            .map(|parent| parent.full_path.clone())
            .unwrap_or_default();
        let target = ScanTarget::Expand {
            full_path: entry.full_path.clone(),
        };
        let location = entry.location.clone();
        Ok(self.issue(target, location, parent_path))
    }

    /// Apply a finished scan.
    ///
    /// Results of superseded or cancelled requests are dropped with
    /// [`NavError::StaleScan`]; a failed scan is returned as an error. In both
    /// cases nothing changes.
    pub fn complete(&mut self, done: CompletedScan) -> Result<ScanStats, NavError> {
        if done.generation != self.generation || self.in_flight.is_none() {
            warn!(scan = ?done.target, "discarding stale scan result");
            return Err(NavError::StaleScan);
        }
        self.in_flight = None;

        let ScanOutput { root, stats } = done.result?;

        match done.target {
            ScanTarget::Root => {
                let tree = SizeTree::from_scan(root);
                let root = tree.root();
                self.tree = Some(tree);
                self.current = Some(root);
                self.breadcrumbs = vec![root];
            }
            ScanTarget::Expand { full_path } => {
                let propagate = self.scanner.config().propagate_expanded_size;
                let tree = self.tree.as_mut().ok_or(NavError::NoTree)?;
                let id = tree
                    .splice(&full_path, root, propagate)
                    .ok_or(NavError::UnknownNode)?;
                debug!(path = %full_path, "spliced expanded directory");
                self.navigate(id);
            }
        }

        Ok(stats)
    }

    /// Cancel the outstanding request, if any. Its result will be discarded.
    pub fn cancel_pending(&mut self) {
        if let Some(cancel) = self.in_flight.take() {
            cancel.cancel();
            self.generation += 1;
        }
    }

    fn issue(&mut self, target: ScanTarget, location: PathBuf, parent_path: String) -> PendingScan {
        self.cancel_pending();
        self.generation += 1;
        let cancel = CancelFlag::new();
        self.in_flight = Some(cancel.clone());
        PendingScan {
            generation: self.generation,
            target,
            location,
            parent_path,
            cancel,
            scanner: Arc::clone(&self.scanner),
        }
    }

    fn container(&self, id: NodeId) -> Result<&Entry, NavError> {
        let tree = self.tree.as_ref().ok_or(NavError::NoTree)?;
        let entry = tree.get(id).ok_or(NavError::UnknownNode)?;
        if !entry.is_dir {
            return Err(NavError::NotAContainer(entry.full_path.clone()));
        }
        Ok(entry)
    }

    fn navigate(&mut self, id: NodeId) {
        let Some(tree) = self.tree.as_ref() else {
            return;
        };
        let Some(full_path) = tree.get(id).map(|e| e.full_path.as_str()) else {
            return;
        };

        let existing = self.breadcrumbs.iter().position(|&crumb| {
            tree.get(crumb)
                .map(|e| e.full_path == full_path)
                .unwrap_or(false)
        });
        match existing {
            Some(index) => self.breadcrumbs.truncate(index + 1),
            None => self.breadcrumbs.push(id),
        }
        self.current = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::tree::tests::ids_by_path;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(path: &Path, len: usize) {
        let mut file = File::create(path).unwrap();
        file.write_all(&vec![b'x'; len]).unwrap();
    }

    /// root/
    ///   a/          600 (a1.bin 400, deep/ (d.bin 200))
    ///   b.bin       300
    ///   c/          100 (c.bin 100)
    ///   empty/
    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/deep")).unwrap();
        write_file(&root.join("a/a1.bin"), 400);
        write_file(&root.join("a/deep/d.bin"), 200);
        write_file(&root.join("b.bin"), 300);
        fs::create_dir(root.join("c")).unwrap();
        write_file(&root.join("c/c.bin"), 100);
        fs::create_dir(root.join("empty")).unwrap();
        dir
    }

    fn navigator(config: ScanConfig) -> TreeNavigator {
        TreeNavigator::new(Arc::new(Scanner::new(config).unwrap()))
    }

    fn lazy_config() -> ScanConfig {
        ScanConfig {
            max_concurrency: 2,
            max_depth: Some(0),
            ..ScanConfig::default()
        }
    }

    fn child_named(nav: &TreeNavigator, parent: NodeId, name: &str) -> NodeId {
        let tree = nav.tree().unwrap();
        tree.children(parent)
            .find(|&c| tree.get(c).unwrap().name == name)
            .unwrap()
    }

    fn snapshot(nav: &TreeNavigator) -> (Option<NodeId>, Option<NodeId>, Vec<NodeId>, u64, usize) {
        (
            nav.root(),
            nav.current(),
            nav.breadcrumbs().to_vec(),
            nav.tree().map(SizeTree::total_size).unwrap_or(0),
            nav.tree().map(SizeTree::node_count).unwrap_or(0),
        )
    }

    #[test]
    fn test_load_root_sets_view() {
        let dir = fixture();
        let mut nav = navigator(ScanConfig::default());
        let stats = nav.load_root(dir.path()).unwrap();

        assert_eq!(stats.total_size, 1000);
        let root = nav.root().unwrap();
        assert_eq!(nav.current(), Some(root));
        assert_eq!(nav.breadcrumbs(), &[root]);
        assert!(!nav.is_scanning());
    }

    #[test]
    fn test_load_root_failure_keeps_state() {
        let dir = fixture();
        let mut nav = navigator(ScanConfig::default());
        nav.load_root(dir.path()).unwrap();
        let before = snapshot(&nav);

        let err = nav.load_root(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, NavError::Scan(ScanError::RootUnavailable { .. })));
        assert_eq!(snapshot(&nav), before);
    }

    #[test]
    fn test_enter_and_breadcrumbs() {
        let dir = fixture();
        let mut nav = navigator(ScanConfig::default());
        nav.load_root(dir.path()).unwrap();
        let root = nav.root().unwrap();

        let a = child_named(&nav, root, "a");
        nav.enter(a).unwrap();
        let deep = child_named(&nav, a, "deep");
        nav.enter(deep).unwrap();
        assert_eq!(nav.breadcrumbs(), &[root, a, deep]);

        // Entering the current node again changes nothing.
        nav.enter(deep).unwrap();
        assert_eq!(nav.breadcrumbs(), &[root, a, deep]);

        // Entering an ancestor truncates the trail.
        nav.enter(a).unwrap();
        assert_eq!(nav.breadcrumbs(), &[root, a]);
        assert_eq!(nav.current(), Some(a));

        assert!(nav.up());
        assert_eq!(nav.breadcrumbs(), &[root]);
        assert!(!nav.up());
    }

    #[test]
    fn test_enter_rejects_files() {
        let dir = fixture();
        let mut nav = navigator(ScanConfig::default());
        nav.load_root(dir.path()).unwrap();
        let b = child_named(&nav, nav.root().unwrap(), "b.bin");
        assert!(matches!(nav.enter(b), Err(NavError::NotAContainer(_))));
    }

    #[test]
    fn test_enter_scanned_empty_dir_needs_no_scan() {
        let dir = fixture();
        let mut nav = navigator(ScanConfig::default());
        nav.load_root(dir.path()).unwrap();
        let empty = child_named(&nav, nav.root().unwrap(), "empty");

        assert_eq!(nav.open(empty).unwrap(), None);
        assert_eq!(nav.current(), Some(empty));
        assert!(nav.current_children().is_empty());
    }

    #[test]
    fn test_enter_unscanned_requires_expand() {
        let dir = fixture();
        let mut nav = navigator(lazy_config());
        nav.load_root(dir.path()).unwrap();
        let a = child_named(&nav, nav.root().unwrap(), "a");
        assert!(matches!(nav.enter(a), Err(NavError::NotExpanded(_))));
    }

    #[test]
    fn test_expand_splices_and_propagates() {
        let dir = fixture();
        let mut nav = navigator(lazy_config());
        nav.load_root(dir.path()).unwrap();
        let root = nav.root().unwrap();
        assert_eq!(nav.tree().unwrap().total_size(), 300);
        let before = ids_by_path(nav.tree().unwrap());
        assert_eq!(before.len(), 5);

        let a = child_named(&nav, root, "a");
        let stats = nav.expand(a).unwrap();
        assert_eq!(stats.total_size, 400);

        let tree = nav.tree().unwrap();
        assert_eq!(nav.current(), Some(a));
        assert_eq!(nav.breadcrumbs(), &[root, a]);
        assert_eq!(tree.get(a).unwrap().size, 400);
        assert_eq!(tree.total_size(), 700);
        let first = tree.children(root).next().unwrap();
        assert_eq!(first, a);

        // Every node that existed before the splice keeps its identity.
        let after = ids_by_path(tree);
        assert_eq!(after.len(), 7);
        for (path, id) in &before {
            assert_eq!(after.get(path), Some(id), "identity changed for {path}");
        }

        // The next level down is still lazy.
        let deep = child_named(&nav, a, "deep");
        assert_eq!(nav.node(deep).unwrap().full_path, format!("{}/a/deep", tree.get(root).unwrap().name));
        assert_eq!(nav.open(deep).unwrap().map(|s| s.total_size), Some(200));
        assert_eq!(nav.breadcrumbs(), &[root, a, deep]);
        assert_eq!(nav.tree().unwrap().total_size(), 900);
    }

    #[test]
    fn test_expand_without_propagation() {
        let dir = fixture();
        let mut nav = navigator(ScanConfig {
            propagate_expanded_size: false,
            ..lazy_config()
        });
        nav.load_root(dir.path()).unwrap();
        let a = child_named(&nav, nav.root().unwrap(), "a");
        nav.expand(a).unwrap();

        let tree = nav.tree().unwrap();
        assert_eq!(tree.get(a).unwrap().size, 0);
        assert_eq!(tree.total_size(), 300);
        assert_eq!(tree.children(a).count(), 2);
    }

    #[test]
    fn test_expand_failure_keeps_state() {
        let dir = fixture();
        let mut nav = navigator(lazy_config());
        nav.load_root(dir.path()).unwrap();
        let a = child_named(&nav, nav.root().unwrap(), "a");
        let before = snapshot(&nav);

        fs::remove_dir_all(dir.path().join("a")).unwrap();
        let err = nav.expand(a).unwrap_err();
        assert!(matches!(err, NavError::Scan(ScanError::RootUnavailable { .. })));
        assert_eq!(snapshot(&nav), before);
        assert_eq!(nav.node(a).unwrap().state, ScanState::Unscanned);
    }

    #[test]
    fn test_expand_populated_dir_is_rejected() {
        let dir = fixture();
        let mut nav = navigator(ScanConfig::default());
        nav.load_root(dir.path()).unwrap();
        let a = child_named(&nav, nav.root().unwrap(), "a");
        assert!(matches!(nav.expand(a), Err(NavError::AlreadyExpanded(_))));
    }

    #[test]
    fn test_superseded_scan_is_discarded() {
        let dir = fixture();
        let other = fixture();
        let mut nav = navigator(ScanConfig::default());

        let first = nav.request_root(dir.path());
        let first_cancel = first.cancel_flag();
        let second = nav.request_root(other.path());
        assert!(first_cancel.is_cancelled());

        let stale = first.run();
        assert!(matches!(nav.complete(stale), Err(NavError::StaleScan)));
        assert!(nav.root().is_none());

        nav.complete(second.run()).unwrap();
        let root = nav.root().unwrap();
        assert_eq!(
            nav.node(root).unwrap().location,
            other.path().to_path_buf()
        );
    }

    #[test]
    fn test_navigation_cancels_pending_expand() {
        let dir = fixture();
        let mut nav = navigator(lazy_config());
        nav.load_root(dir.path()).unwrap();
        let root = nav.root().unwrap();
        let a = child_named(&nav, root, "a");
        let before = snapshot(&nav);

        let pending = nav.request_expand(a).unwrap();
        assert!(nav.is_scanning());
        assert!(nav.home());
        assert!(!nav.is_scanning());

        let done = pending.run();
        assert!(matches!(nav.complete(done), Err(NavError::StaleScan)));
        assert_eq!(snapshot(&nav), before);
    }

    #[test]
    fn test_cancel_running_expand_leaves_tree_unchanged() {
        let dir = fixture();
        for i in 0..2048 {
            File::create(dir.path().join(format!("a/f{i}"))).unwrap();
        }
        let mut nav = navigator(ScanConfig {
            max_concurrency: 1,
            ..lazy_config()
        });
        nav.load_root(dir.path()).unwrap();
        let a = child_named(&nav, nav.root().unwrap(), "a");
        let before = snapshot(&nav);

        let pending = nav.request_expand(a).unwrap();
        let worker = std::thread::spawn(move || pending.run());
        nav.cancel_pending();
        let done = worker.join().unwrap();

        assert!(matches!(done.result, Err(ScanError::Cancelled)));
        assert!(matches!(nav.complete(done), Err(NavError::StaleScan)));
        assert_eq!(snapshot(&nav), before);
        assert_eq!(nav.node(a).unwrap().state, ScanState::Unscanned);
        assert!(!nav.is_scanning());
    }

    #[test]
    fn test_handle_from_previous_tree_is_rejected() {
        let first = fixture();
        let second = fixture();
        let mut nav = navigator(ScanConfig::default());
        nav.load_root(first.path()).unwrap();
        let old_a = child_named(&nav, nav.root().unwrap(), "a");

        nav.load_root(second.path()).unwrap();
        let before = snapshot(&nav);

        assert!(nav.node(old_a).is_none());
        assert!(matches!(nav.enter(old_a), Err(NavError::UnknownNode)));
        assert!(matches!(nav.open(old_a), Err(NavError::UnknownNode)));
        assert!(matches!(nav.expand(old_a), Err(NavError::UnknownNode)));
        assert_eq!(snapshot(&nav), before);
    }

    #[test]
    fn test_operations_without_tree() {
        let mut nav = navigator(ScanConfig::default());
        assert!(nav.current_children().is_empty());
        assert!(!nav.home());
        assert!(!nav.up());
        assert!(nav.find_by_path("x").is_none());
    }
}
