use std::path::{Path, PathBuf};

use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUsage {
    pub capacity: u64,
    pub used: u64,
}

impl VolumeUsage {
    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

/// Byte budget of the exposed storage. Used space is measured from the
/// files actually present on every query.
pub struct Volume {
    root_dir: PathBuf,
    capacity: u64,
}

impl Volume {
    pub fn new(root_dir: PathBuf, capacity: u64) -> Self {
        Self { root_dir, capacity }
    }

    pub async fn usage(&self) -> std::io::Result<VolumeUsage> {
        Ok(VolumeUsage {
            capacity: self.capacity,
            used: used_bytes(&self.root_dir).await?,
        })
    }
}

async fn used_bytes(root: &Path) -> std::io::Result<u64> {
    let mut pending = vec![root.to_path_buf()];
    let mut total = 0u64;
    while let Some(dir) = pending.pop() {
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else if metadata.is_file() {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn usage_counts_files_at_every_depth() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a"), vec![0u8; 1000]).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("d/e")).unwrap();
        std::fs::write(temp_dir.path().join("d/e/b"), vec![0u8; 96]).unwrap();

        let volume = Volume::new(temp_dir.path().to_path_buf(), 4096);
        let usage = volume.usage().await.unwrap();
        assert_eq!(usage.used, 1096);
        assert_eq!(usage.free(), 3000);

        let tiny = Volume::new(temp_dir.path().to_path_buf(), 10);
        assert_eq!(tiny.usage().await.unwrap().free(), 0);
    }
}
