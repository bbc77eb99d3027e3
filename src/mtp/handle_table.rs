//! Snapshot of the exposed filesystem as session-scoped object handles.
//!
//! The table is rebuilt wholesale when a session opens and is only patched
//! by uploads and deletions made through the responder. Slot index and
//! handle value are independent: slots are reused after a deletion, handle
//! values never are within a session.

use std::path::Path;

use log::{debug, error, warn};
use tokio::fs;

use super::types::{HANDLE_TABLE_CAPACITY, Handle, MAX_NAME_LEN, ROOT_HANDLE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEntry {
    pub handle: Handle,
    pub parent: Handle,
    pub is_dir: bool,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleTable {
    slots: Vec<Option<HandleEntry>>,
    used: usize,
    next_handle: Handle,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            slots: vec![None; HANDLE_TABLE_CAPACITY],
            used: 0,
            next_handle: 0,
        }
    }
}

/// Cuts `name` to at most [`MAX_NAME_LEN`] bytes on a character boundary.
pub fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_full(&self) -> bool {
        self.used >= HANDLE_TABLE_CAPACITY
    }

    pub fn free_slots(&self) -> usize {
        HANDLE_TABLE_CAPACITY - self.used
    }

    /// Allocates the next handle value. Values are never handed out twice
    /// until the counter is reset by a session close or a regeneration.
    pub fn assign_new_handle(&mut self) -> Handle {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn reset_counter(&mut self) {
        self.next_handle = 0;
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.used = 0;
        self.next_handle = 0;
    }

    pub fn find(&self, handle: Handle) -> Option<&HandleEntry> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.handle == handle)
    }

    pub fn find_empty_slot(&self) -> Result<usize, TableFull> {
        self.slots.iter().position(Option::is_none).ok_or(TableFull)
    }

    /// Records a new entry under a freshly assigned handle.
    pub fn insert(&mut self, parent: Handle, name: &str, is_dir: bool) -> Result<Handle, TableFull> {
        let slot = self.find_empty_slot()?;
        let handle = self.assign_new_handle();
        debug!("Handle {} = {:?} (parent {}, slot {})", handle, name, parent, slot);
        self.slots[slot] = Some(HandleEntry {
            handle,
            parent,
            is_dir,
            name: truncate_name(name),
        });
        self.used += 1;
        Ok(handle)
    }

    /// Frees the slot holding `handle`. The handle value stays retired.
    pub fn remove(&mut self, handle: Handle) -> Option<HandleEntry> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|entry| entry.handle == handle))?;
        self.used -= 1;
        slot.take()
    }

    pub fn children(&self, parent: Handle) -> Vec<Handle> {
        self.slots
            .iter()
            .flatten()
            .filter(|entry| entry.parent == parent)
            .map(|entry| entry.handle)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HandleEntry> {
        self.slots.iter().flatten()
    }

    /// Rebuilds the table from the root directory and one level below it.
    /// Stops quietly once every slot is taken.
    pub async fn regenerate(&mut self, root: &Path) {
        self.clear();

        let root_items = match list_dir(root).await {
            Ok(items) => items,
            Err(e) => {
                error!("Cannot read root directory {:?}: {}", root, e);
                return;
            }
        };

        for (name, is_dir) in root_items {
            let Ok(handle) = self.insert(ROOT_HANDLE, &name, is_dir) else {
                warn!("Handle table full, stopping handle table init");
                return;
            };
            if !is_dir {
                continue;
            }

            let children = match list_dir(&root.join(&name)).await {
                Ok(items) => items,
                Err(e) => {
                    error!("Cannot read directory {:?}: {}", root.join(&name), e);
                    continue;
                }
            };
            for (child, child_is_dir) in children {
                if self.insert(handle, &child, child_is_dir).is_err() {
                    warn!("Handle table full, stopping handle table init");
                    return;
                }
            }
        }
    }
}

/// Lists a directory as (name, is_dir) pairs sorted by name.
async fn list_dir(path: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let mut read_dir = fs::read_dir(path).await?;
    let mut items = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        // Recorded names must map back to the same path.
        let name = match entry.file_name().into_string() {
            Ok(name) if name.len() <= MAX_NAME_LEN => name,
            Ok(name) => {
                warn!("Skipping {:?}: name longer than {} bytes", name, MAX_NAME_LEN);
                continue;
            }
            Err(name) => {
                warn!("Skipping {:?}: name is not UTF-8", name);
                continue;
            }
        };
        let is_dir = match entry.file_type().await {
            Ok(file_type) => file_type.is_dir(),
            Err(e) => {
                warn!("Failed to get file type for {}: {}", name, e);
                false
            }
        };
        items.push((name, is_dir));
    }
    items.sort();
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn names_under(table: &HandleTable, parent: Handle) -> BTreeSet<String> {
        table
            .children(parent)
            .into_iter()
            .map(|h| table.find(h).unwrap().name.clone())
            .collect()
    }

    #[tokio::test]
    async fn regenerate_mirrors_two_levels() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::create_dir(root.join("photos")).unwrap();
        std::fs::write(root.join("photos/p1.jpg"), b"p").unwrap();
        std::fs::create_dir_all(root.join("photos/deep/deeper")).unwrap();

        let mut table = HandleTable::new();
        table.regenerate(root).await;

        assert_eq!(
            names_under(&table, ROOT_HANDLE),
            BTreeSet::from(["a.txt".to_string(), "photos".to_string()])
        );
        let photos = table.entries().find(|e| e.name == "photos").unwrap().clone();
        assert!(photos.is_dir);
        assert_eq!(
            names_under(&table, photos.handle),
            BTreeSet::from(["deep".to_string(), "p1.jpg".to_string()])
        );
        let deep = table.entries().find(|e| e.name == "deep").unwrap();
        assert!(deep.is_dir);
        assert!(table.children(deep.handle).is_empty());
        assert_eq!(table.used(), 4);
    }

    #[tokio::test]
    async fn regenerate_skips_names_too_long_to_record() {
        let temp_dir = TempDir::new().unwrap();
        let long = "n".repeat(MAX_NAME_LEN + 1);
        std::fs::write(temp_dir.path().join(&long), b"x").unwrap();
        std::fs::write(temp_dir.path().join("short"), b"x").unwrap();

        let mut table = HandleTable::new();
        table.regenerate(temp_dir.path()).await;

        assert_eq!(
            names_under(&table, ROOT_HANDLE),
            BTreeSet::from(["short".to_string()])
        );
        assert_eq!(table.used(), 1);
    }

    #[tokio::test]
    async fn regenerate_assigns_handles_from_one() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("b"), b"").unwrap();
        std::fs::write(temp_dir.path().join("a"), b"").unwrap();

        let mut table = HandleTable::new();
        table.insert(ROOT_HANDLE, "stale", false).unwrap();
        table.regenerate(temp_dir.path()).await;

        let mut handles: Vec<_> = table.entries().map(|e| e.handle).collect();
        handles.sort();
        assert_eq!(handles, vec![1, 2]);
        assert_eq!(table.assign_new_handle(), 3);
    }

    #[tokio::test]
    async fn regenerate_stops_at_capacity_without_failing() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..40 {
            std::fs::write(temp_dir.path().join(format!("f{i:02}")), b"").unwrap();
        }

        let mut table = HandleTable::new();
        table.regenerate(temp_dir.path()).await;

        assert_eq!(table.used(), HANDLE_TABLE_CAPACITY);
        assert!(table.is_full());
        assert_eq!(table.find_empty_slot(), Err(TableFull));
        assert!(table.find(1).is_some());
        assert!(table.find(HANDLE_TABLE_CAPACITY as Handle + 1).is_none());
    }

    #[test]
    fn removed_handles_are_never_reassigned() {
        let mut table = HandleTable::new();
        let first = table.insert(ROOT_HANDLE, "one", false).unwrap();
        let second = table.insert(ROOT_HANDLE, "two", false).unwrap();

        let removed = table.remove(first).unwrap();
        assert_eq!(removed.name, "one");
        assert_eq!(table.used(), 1);
        assert!(table.find(first).is_none());
        assert!(table.remove(first).is_none());

        // The freed slot is reused, the value is not.
        assert_eq!(table.find_empty_slot(), Ok(0));
        let third = table.insert(ROOT_HANDLE, "three", false).unwrap();
        assert!(third > second);
        assert_eq!(table.children(ROOT_HANDLE).len(), 2);
    }

    #[test]
    fn long_names_are_truncated_on_char_boundaries() {
        let ascii = "x".repeat(80);
        assert_eq!(truncate_name(&ascii).len(), MAX_NAME_LEN);

        let wide = "é".repeat(40);
        let cut = truncate_name(&wide);
        assert!(cut.len() <= MAX_NAME_LEN);
        assert_eq!(cut.chars().count(), 31);
    }
}
