use std::io::SeekFrom;
use std::path::PathBuf;

use log::{info, warn};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};

/// A file held open across the phases of one transfer.
#[derive(Debug)]
pub struct FileInfo {
    pub file: fs::File,
    pub path: PathBuf,
}

impl FileInfo {
    pub async fn open_read(path: PathBuf) -> Result<(Self, u64), std::io::Error> {
        let mut file = fs::File::open(&path).await?;
        let size = file.seek(SeekFrom::End(0)).await?;
        file.seek(SeekFrom::Start(0)).await?;

        info!("Opened file for read: {:?}, size: {}", path, size);
        Ok((Self { file, path }, size))
    }

    pub async fn create(path: PathBuf) -> Result<Self, std::io::Error> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;

        info!("Created file for write: {:?}", path);
        Ok(Self { file, path })
    }

    /// Fills `buf` from `offset`, accumulating short reads. Running out of
    /// file before `buf` is full is an error.
    pub async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), std::io::Error> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(())
    }

    pub async fn append(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        self.file.write_all(data).await
    }

    pub async fn close(mut self) {
        if let Err(e) = self.file.flush().await {
            warn!("Failed to flush {:?}: {}", self.path, e);
        }
        info!("Closed file: {:?}", self.path);
    }
}
