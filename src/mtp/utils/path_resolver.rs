use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::mtp::handle_table::HandleTable;
use crate::mtp::types::{Handle, ROOT_HANDLE, ResponseCode};

/// Maps handle table entries to paths below the exposed root.
///
/// Paths have at most two segments below the root: the parent's name when
/// the parent is not the root, then the entry's own name.
pub struct PathResolver {
    root_dir: PathBuf,
}

impl PathResolver {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    pub fn path_for(&self, table: &HandleTable, handle: Handle) -> Result<PathBuf, ResponseCode> {
        let Some(entry) = table.find(handle) else {
            warn!("No object for handle {}", handle);
            return Err(ResponseCode::InvalidObjectHandle);
        };

        let mut path = self.root_dir.clone();
        if entry.parent != ROOT_HANDLE {
            let Some(parent) = table.find(entry.parent) else {
                warn!("Handle {} has a dangling parent {}", handle, entry.parent);
                return Err(ResponseCode::InvalidObjectHandle);
            };
            path.push(&parent.name);
        }
        path.push(&entry.name);

        debug!("Mapped handle {} to {:?}", handle, path);
        Ok(path)
    }

    /// Path for an object not yet in the table.
    pub fn create_path(
        &self,
        table: &HandleTable,
        parent: Handle,
        name: &str,
    ) -> Result<PathBuf, ResponseCode> {
        let mut path = self.root_dir.clone();
        if parent != ROOT_HANDLE {
            let Some(parent_entry) = table.find(parent) else {
                warn!("Cannot create {:?}: parent {} not found", name, parent);
                return Err(ResponseCode::InvalidParentObject);
            };
            path.push(&parent_entry.name);
        }
        path.push(name);
        Ok(path)
    }

    pub fn get_root_dir(&self) -> &Path {
        &self.root_dir
    }
}

/// Rejects names that would escape their directory.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_have_at_most_two_segments() {
        let mut table = HandleTable::new();
        let dir = table.insert(ROOT_HANDLE, "photos", true).unwrap();
        let file = table.insert(dir, "p1.jpg", false).unwrap();
        let top = table.insert(ROOT_HANDLE, "a.txt", false).unwrap();

        let resolver = PathResolver::new(PathBuf::from("/data"));
        assert_eq!(resolver.path_for(&table, top), Ok(PathBuf::from("/data/a.txt")));
        assert_eq!(
            resolver.path_for(&table, file),
            Ok(PathBuf::from("/data/photos/p1.jpg"))
        );
        assert_eq!(
            resolver.create_path(&table, dir, "new.bin"),
            Ok(PathBuf::from("/data/photos/new.bin"))
        );
        assert_eq!(
            resolver.create_path(&table, ROOT_HANDLE, "x"),
            Ok(PathBuf::from("/data/x"))
        );
    }

    #[test]
    fn unknown_handles_fail_closed() {
        let table = HandleTable::new();
        let resolver = PathResolver::new(PathBuf::from("/data"));
        assert_eq!(
            resolver.path_for(&table, 9),
            Err(ResponseCode::InvalidObjectHandle)
        );
        assert_eq!(
            resolver.path_for(&table, ROOT_HANDLE),
            Err(ResponseCode::InvalidObjectHandle)
        );
        assert_eq!(
            resolver.create_path(&table, 9, "x"),
            Err(ResponseCode::InvalidParentObject)
        );
    }

    #[test]
    fn plain_names_only() {
        assert!(is_plain_name("a.txt"));
        assert!(!is_plain_name(""));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("a/b"));
    }
}
