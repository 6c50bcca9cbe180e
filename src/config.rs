use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ScanError;

/// macOS Docker Desktop keeps its VM disk image here. The file reports a huge
/// apparent size that has nothing to do with real usage, so it is skipped.
const DOCKER_VM_PATH: &str = "Library/Containers/com.docker.docker/Data/vms";

/// Tunables for [`Scanner`](crate::Scanner) and the navigator built on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Size of the worker pool shared by every directory of one scan.
    pub max_concurrency: usize,
    /// Containers more than this many levels below the scan root are left
    /// unscanned and loaded later on demand. `None` scans everything.
    pub max_depth: Option<usize>,
    /// Drop entries whose name starts with a dot.
    pub skip_hidden: bool,
    /// After a lazy expansion, push the fresh size of the expanded directory
    /// up into its ancestors.
    pub propagate_expanded_size: bool,
    /// Slash-separated component sequences; any entry whose path contains one
    /// of them is skipped.
    pub skip_paths: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_parallelism(),
            max_depth: None,
            skip_hidden: false,
            propagate_expanded_size: true,
            skip_paths: vec![DOCKER_VM_PATH.to_string()],
        }
    }
}

impl ScanConfig {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ScanError::InvalidConfig(format!("{}: {e}", path.display())))?;
        let config: ScanConfig = serde_json::from_str(&contents)
            .map_err(|e| ScanError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.max_concurrency == 0 {
            return Err(ScanError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.skip_paths.iter().any(|p| p.trim_matches('/').is_empty()) {
            return Err(ScanError::InvalidConfig(
                "skip_paths entries must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether an entry should be left out of the scan entirely.
    pub fn should_skip(&self, path: &Path) -> bool {
        if self.skip_hidden {
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(false);
            if hidden {
                return true;
            }
        }

        if self.skip_paths.is_empty() {
            return false;
        }

        let components: Vec<&str> = path
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();

        self.skip_paths.iter().any(|pattern| {
            let needle: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
            !needle.is_empty()
                && components
                    .windows(needle.len())
                    .any(|window| window == needle.as_slice())
        })
    }
}

/// Twice the core count, kept between 4 and 64 threads.
pub fn default_parallelism() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cores * 2).clamp(4, 64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_docker_vm_path() {
        let config = ScanConfig::default();
        let docker_vm_file = Path::new(
            "/Users/demo/Library/Containers/com.docker.docker/Data/vms/0/data/Docker.raw",
        );
        let normal_file = Path::new("/Users/demo/Documents/test.txt");

        assert!(config.should_skip(docker_vm_file));
        assert!(!config.should_skip(normal_file));
    }

    #[test]
    fn test_skip_requires_contiguous_components() {
        let config = ScanConfig {
            skip_paths: vec!["a/b".to_string()],
            ..ScanConfig::default()
        };
        assert!(config.should_skip(Path::new("/x/a/b/c")));
        assert!(!config.should_skip(Path::new("/x/a/z/b")));
    }

    #[test]
    fn test_skip_hidden() {
        let mut config = ScanConfig::default();
        assert!(!config.should_skip(Path::new("/home/u/.cache")));
        config.skip_hidden = true;
        assert!(config.should_skip(Path::new("/home/u/.cache")));
        assert!(!config.should_skip(Path::new("/home/u/cache")));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ScanConfig = serde_json::from_str(r#"{"max_depth": 2}"#).unwrap();
        assert_eq!(config.max_depth, Some(2));
        assert!(config.propagate_expanded_size);
        assert_eq!(config.max_concurrency, default_parallelism());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bigfiles.json");
        std::fs::write(&path, r#"{"skip_hidden": true, "skip_paths": ["node_modules"]}"#).unwrap();

        let config = ScanConfig::load_from_file(&path).unwrap();
        assert!(config.skip_hidden);
        assert_eq!(config.skip_paths, vec!["node_modules".to_string()]);
        assert!(config.should_skip(Path::new("/w/app/node_modules/x.js")));

        std::fs::write(&path, r#"{"max_concurrency": 0}"#).unwrap();
        assert!(matches!(ScanConfig::load_from_file(&path), Err(ScanError::InvalidConfig(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(ScanConfig::load_from_file(&path).is_err());
        assert!(ScanConfig::load_from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ScanConfig::default().validate().is_ok());

        let zero = ScanConfig {
            max_concurrency: 0,
            ..ScanConfig::default()
        };
        assert!(matches!(zero.validate(), Err(ScanError::InvalidConfig(_))));

        let empty_pattern = ScanConfig {
            skip_paths: vec!["/".to_string()],
            ..ScanConfig::default()
        };
        assert!(empty_pattern.validate().is_err());
    }
}
