//! The single file transfer in flight and its chunking across phases.

use std::path::PathBuf;

use log::{debug, error, info, warn};

use crate::file_info::FileInfo;

use super::container::{Container, HEADER_LEN};
use super::types::{Handle, ResponseCode};

#[derive(Debug)]
enum ActiveTransfer {
    Reading {
        handle: Handle,
        file: FileInfo,
        size: u64,
    },
    Writing {
        handle: Handle,
        file: FileInfo,
        expected: u64,
        written: u64,
    },
}

impl ActiveTransfer {
    fn handle(&self) -> Handle {
        match self {
            ActiveTransfer::Reading { handle, .. } | ActiveTransfer::Writing { handle, .. } => {
                *handle
            }
        }
    }

    fn into_file(self) -> FileInfo {
        match self {
            ActiveTransfer::Reading { file, .. } | ActiveTransfer::Writing { file, .. } => file,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    More { remaining: u64 },
    Done,
}

pub struct TransferEngine {
    active: Option<ActiveTransfer>,
    staging: Vec<u8>,
}

impl TransferEngine {
    /// `staging_size` must equal the transport's per-transfer buffer.
    pub fn new(staging_size: usize) -> Self {
        Self {
            active: None,
            staging: vec![0u8; staging_size],
        }
    }

    pub fn staging_capacity(&self) -> usize {
        self.staging.len()
    }

    pub fn active_handle(&self) -> Option<Handle> {
        self.active.as_ref().map(ActiveTransfer::handle)
    }

    /// Handle and bytes still expected of an upload waiting for its data.
    pub fn pending_write(&self) -> Option<(Handle, u64)> {
        match &self.active {
            Some(ActiveTransfer::Writing {
                handle,
                expected,
                written,
                ..
            }) => Some((*handle, expected - written)),
            _ => None,
        }
    }

    /// Closes whatever file is open. Partially written data stays on disk.
    pub async fn release(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Releasing transfer for handle {}", active.handle());
            active.into_file().close().await;
        }
    }

    /// Opens `handle` for reading unless it is already the cached file.
    pub async fn open_for_read(&mut self, handle: Handle, path: PathBuf) -> Result<u64, ResponseCode> {
        if let Some(ActiveTransfer::Reading {
            handle: current,
            size,
            ..
        }) = &self.active
        {
            if *current == handle {
                return Ok(*size);
            }
        }
        self.release().await;

        let (file, size) = FileInfo::open_read(path).await.map_err(|e| {
            warn!("Failed to open handle {} for read: {}", handle, e);
            ResponseCode::InvalidObjectHandle
        })?;
        if size > (u32::MAX as u64) - HEADER_LEN as u64 {
            warn!("Handle {} is too large for one container ({} bytes)", handle, size);
            file.close().await;
            return Err(ResponseCode::GeneralError);
        }
        self.active = Some(ActiveTransfer::Reading { handle, file, size });
        Ok(size)
    }

    /// Command phase of a download: declares the whole object and queues
    /// as much of its head as the first packet holds.
    pub async fn send_first_chunk(&mut self, io: &mut Container) -> Result<(), ResponseCode> {
        let Some(ActiveTransfer::Reading { handle, file, size }) = &mut self.active else {
            return Err(ResponseCode::InvalidObjectHandle);
        };
        let (handle, size) = (*handle, *size);

        let want = (size as usize).min(self.staging.len());
        let read = file.read_at(0, &mut self.staging[..want]).await;
        if let Err(e) = read {
            error!("Failed to read handle {}: {}", handle, e);
            self.release().await;
            return Err(ResponseCode::GeneralError);
        }
        let queued = io.add_raw_partial(&self.staging[..want], size as usize);
        io.data_send();
        debug!("Handle {}: queued {} of {} bytes", handle, queued, size);

        if queued as u64 >= size {
            info!("Handle {} fit in the first packet, closing", handle);
            self.release().await;
        }
        Ok(())
    }

    /// Data phase of a download. `total_xferred` counts the container header.
    pub async fn send_next_chunk(
        &mut self,
        total_xferred: u32,
        io: &mut Container,
    ) -> Result<(), ResponseCode> {
        let Some(ActiveTransfer::Reading { handle, file, size }) = &mut self.active else {
            return Err(ResponseCode::InvalidObjectHandle);
        };
        let (handle, size) = (*handle, *size);

        let Some(offset) = (total_xferred as u64).checked_sub(HEADER_LEN as u64) else {
            return Err(ResponseCode::GeneralError);
        };
        let chunk = size.saturating_sub(offset).min(io.capacity() as u64) as usize;
        if chunk > 0 {
            let read = file.read_at(offset, io.payload_mut(chunk)).await;
            if let Err(e) = read {
                error!("Failed to read handle {} at {}: {}", handle, offset, e);
                self.release().await;
                return Err(ResponseCode::GeneralError);
            }
            io.data_send();
            debug!("Handle {}: sent {} bytes at {}", handle, chunk, offset);
        }

        if offset + chunk as u64 >= size {
            info!("Handle {} read completed, closing", handle);
            self.release().await;
        }
        Ok(())
    }

    pub async fn begin_write(&mut self, handle: Handle, file: FileInfo, expected: u64) {
        self.release().await;
        self.active = Some(ActiveTransfer::Writing {
            handle,
            file,
            expected,
            written: 0,
        });
    }

    /// Appends one received chunk of an upload.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<WriteProgress, ResponseCode> {
        let Some(ActiveTransfer::Writing {
            handle,
            file,
            expected,
            written,
        }) = &mut self.active
        else {
            return Err(ResponseCode::InvalidObjectHandle);
        };

        // Bytes past the declared size are left for the driver to drain.
        let take = data.len().min((*expected - *written) as usize);
        let appended = file.append(&data[..take]).await;
        if let Err(e) = appended {
            error!("Failed to write handle {}: {}", handle, e);
            self.release().await;
            return Err(ResponseCode::GeneralError);
        }
        *written += take as u64;
        debug!("Handle {}: written {} of {} bytes", handle, written, expected);

        if *written < *expected {
            return Ok(WriteProgress::More {
                remaining: *expected - *written,
            });
        }
        info!("Handle {} write completed, closing", handle);
        self.release().await;
        Ok(WriteProgress::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtp::container::ContainerKind;
    use tempfile::TempDir;

    const PACKET: usize = 64;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    /// Drives a download the way the driver does and returns the bytes sent.
    async fn download(engine: &mut TransferEngine, path: PathBuf) -> (Vec<u8>, usize) {
        let size = engine.open_for_read(1, path).await.unwrap();
        let mut io = Container::new(PACKET);
        io.begin_command(
            &crate::mtp::container::CommandContainer {
                code: 0x1009,
                transaction_id: 1,
                params: [1, 0, 0, 0, 0],
            },
            PACKET,
        );
        engine.send_first_chunk(&mut io).await.unwrap();
        assert_eq!(io.header.kind, ContainerKind::Data);
        assert_eq!(io.header.length as u64, HEADER_LEN as u64 + size);

        let mut out = io.payload().to_vec();
        let mut total = HEADER_LEN + out.len();
        let mut phases = 0;
        while total < io.header.length as usize {
            io.begin_continuation(PACKET);
            engine.send_next_chunk(total as u32, &mut io).await.unwrap();
            out.extend_from_slice(io.payload());
            total += io.payload().len();
            phases += 1;
        }
        (out, phases)
    }

    #[tokio::test]
    async fn download_reassembles_across_phases() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big");
        let data = content(PACKET * 3 + 5);
        std::fs::write(&path, &data).unwrap();

        let mut engine = TransferEngine::new(PACKET);
        let (out, phases) = download(&mut engine, path).await;
        assert_eq!(out, data);
        assert!(phases >= 3);
        assert_eq!(engine.active_handle(), None);
    }

    #[tokio::test]
    async fn small_download_closes_after_first_packet() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("small");
        std::fs::write(&path, b"hello").unwrap();

        let mut engine = TransferEngine::new(PACKET);
        let (out, phases) = download(&mut engine, path).await;
        assert_eq!(out, b"hello");
        assert_eq!(phases, 0);
        assert_eq!(engine.active_handle(), None);
    }

    #[tokio::test]
    async fn cached_reader_is_reused_for_the_same_handle() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f");
        std::fs::write(&path, content(10)).unwrap();

        let mut engine = TransferEngine::new(PACKET);
        assert_eq!(engine.open_for_read(4, path.clone()).await, Ok(10));
        std::fs::remove_file(&path).unwrap();
        assert_eq!(engine.open_for_read(4, path.clone()).await, Ok(10));
        assert_eq!(
            engine.open_for_read(5, path).await,
            Err(ResponseCode::InvalidObjectHandle)
        );
        assert_eq!(engine.active_handle(), None);
    }

    #[tokio::test]
    async fn upload_tracks_bytes_against_expected_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("up");
        let file = FileInfo::create(path.clone()).await.unwrap();

        let mut engine = TransferEngine::new(PACKET);
        engine.begin_write(9, file, 10).await;
        assert_eq!(engine.pending_write(), Some((9, 10)));

        assert_eq!(
            engine.write_chunk(b"01234").await,
            Ok(WriteProgress::More { remaining: 5 })
        );
        assert_eq!(engine.write_chunk(b"56789").await, Ok(WriteProgress::Done));
        assert_eq!(engine.pending_write(), None);
        assert_eq!(
            engine.write_chunk(b"x").await,
            Err(ResponseCode::InvalidObjectHandle)
        );
        assert_eq!(std::fs::read(path).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn upload_ignores_bytes_past_declared_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("up");
        let file = FileInfo::create(path.clone()).await.unwrap();

        let mut engine = TransferEngine::new(PACKET);
        engine.begin_write(3, file, 4).await;
        assert_eq!(engine.write_chunk(b"abcdefgh").await, Ok(WriteProgress::Done));
        assert_eq!(std::fs::read(path).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn release_keeps_partial_upload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("partial");
        let file = FileInfo::create(path.clone()).await.unwrap();

        let mut engine = TransferEngine::new(PACKET);
        engine.begin_write(2, file, 100).await;
        engine.write_chunk(b"abc").await.unwrap();
        engine.release().await;

        assert_eq!(engine.active_handle(), None);
        assert_eq!(std::fs::read(path).unwrap(), b"abc");
    }
}
