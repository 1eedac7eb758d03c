//! In-memory mock filesystem for testing sources without real `/proc`.

use crate::collector::traits::FileSystem;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
enum Node {
    File(String),
    Dir,
}

/// Path-ordered node map. Every ancestor of a node is present as a `Dir`.
#[derive(Debug, Default)]
struct Tree(BTreeMap<PathBuf, Node>);

impl Tree {
    fn insert(&mut self, path: PathBuf, node: Node) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.0.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
        }
        self.0.insert(path, node);
    }

    fn children(&self, dir: &Path) -> Vec<PathBuf> {
        self.0
            .range::<Path, _>((std::ops::Bound::Excluded(dir), std::ops::Bound::Unbounded))
            .map(|(p, _)| p)
            .take_while(|p| p.starts_with(dir))
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect()
    }
}

/// In-memory filesystem for testing.
///
/// Clones share one tree, so a test can keep a handle and rewrite counter
/// files while a source that owns another clone keeps sampling.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<RwLock<Tree>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read()
    }

    fn tree_mut(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write()
    }

    /// Adds or replaces a file, creating its parent directories.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.tree_mut()
            .insert(path.as_ref().to_path_buf(), Node::File(content.into()));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.tree_mut().insert(path.as_ref().to_path_buf(), Node::Dir);
    }

    /// Removes a file or a whole directory subtree.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.tree_mut().0.retain(|p, _| !p.starts_with(path));
    }
}

fn not_found(what: &str, path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such {}: {}", what, path.display()),
    )
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        match self.tree().0.get(path) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(Node::Dir) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("is a directory: {}", path.display()),
            )),
            None => Err(not_found("file", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.tree().0.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = self.tree();
        match tree.0.get(path) {
            Some(Node::Dir) => Ok(tree.children(path)),
            _ => Err(not_found("directory", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_creates_parents() {
        let fs = MockFs::new();
        fs.add_file("/proc/net/dev", "Inter-|\n");

        assert!(fs.exists(Path::new("/proc/net")));
        assert!(fs.exists(Path::new("/proc")));
        assert_eq!(
            fs.read_to_string(Path::new("/proc/net/dev")).unwrap(),
            "Inter-|\n"
        );
        assert!(fs.read_to_string(Path::new("/proc/net")).is_err());
    }

    #[test]
    fn test_read_dir_lists_direct_children() {
        let fs = MockFs::new();
        fs.add_file("/sys/class/infiniband/mlx5_0/ports/1/counters/port_rcv_data", "1");
        fs.add_file("/sys/class/infiniband/mlx5_1/ports/1/counters/port_rcv_data", "2");
        fs.add_dir("/sys/class/infiniband/mlx5_2");
        fs.add_file("/sys/class/infiniband_mad/abi_version", "5");

        let devices = fs.read_dir(Path::new("/sys/class/infiniband")).unwrap();
        assert_eq!(
            devices,
            vec![
                PathBuf::from("/sys/class/infiniband/mlx5_0"),
                PathBuf::from("/sys/class/infiniband/mlx5_1"),
                PathBuf::from("/sys/class/infiniband/mlx5_2"),
            ]
        );
        assert!(fs.read_dir(Path::new("/sys/class/infiniband/mlx5_2")).unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_contents() {
        let fs = MockFs::new();
        let source_view = fs.clone();
        fs.add_file("/proc/stat", "cpu  1 0 0 0 0 0 0 0 0 0\n");
        fs.add_file("/proc/stat", "cpu  2 0 0 0 0 0 0 0 0 0\n");
        assert_eq!(
            source_view.read_to_string(Path::new("/proc/stat")).unwrap(),
            "cpu  2 0 0 0 0 0 0 0 0 0\n"
        );
    }

    #[test]
    fn test_remove_subtree() {
        let fs = MockFs::new();
        fs.add_file("/sys/class/infiniband/mlx5_0/ports/1/counters/port_rcv_data", "1");
        fs.remove("/sys/class/infiniband/mlx5_0");
        assert!(!fs.exists(Path::new("/sys/class/infiniband/mlx5_0")));
        assert!(fs.exists(Path::new("/sys/class/infiniband")));
        assert!(fs.read_dir(Path::new("/sys/class/infiniband")).unwrap().is_empty());
    }

    #[test]
    fn test_missing_paths() {
        let fs = MockFs::new();
        let err = fs.read_to_string(Path::new("/nonexistent")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        fs.add_file("/proc/stat", "");
        assert!(fs.read_dir(Path::new("/proc/stat")).is_err());
    }
}
