//! Bulk-pipe class driver: frames a byte stream into command, data and
//! response phases and re-enters the responder at each of them.

use anyhow::{Result, bail, ensure};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::container::{
    Armed, CommandContainer, Container, ContainerHeader, ContainerKind, HEADER_LEN, MAX_PARAMS,
};
use super::session::{CallbackData, MtpResponder};
use super::types::{Phase, ResponseCode};

pub struct ClassDriver<'a, S> {
    stream: S,
    responder: &'a mut MtpResponder,
    io: Container,
    packet_size: usize,
}

impl<'a, S> ClassDriver<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, responder: &'a mut MtpResponder, packet_size: usize) -> Result<Self> {
        ensure!(
            packet_size > HEADER_LEN,
            "packet size {packet_size} cannot hold a container header"
        );
        ensure!(
            packet_size == responder.staging_capacity(),
            "packet size {} does not match the responder staging buffer ({})",
            packet_size,
            responder.staging_capacity()
        );
        Ok(Self {
            stream,
            responder,
            io: Container::new(packet_size),
            packet_size,
        })
    }

    /// Serves commands until the host disconnects. A transaction that
    /// breaks mid-way is cancelled before the error is returned.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let Some(command) = self.read_command().await? else {
                info!("Host disconnected");
                return Ok(());
            };
            if let Err(e) = self.transact(&command).await {
                warn!("Transaction {} aborted: {:#}", command.transaction_id, e);
                self.responder.cancel(command.transaction_id).await;
                return Err(e);
            }
        }
    }

    async fn read_command(&mut self) -> Result<Option<CommandContainer>> {
        let header = loop {
            let mut raw = [0u8; HEADER_LEN];
            match self.stream.read_exact(&mut raw).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            let header = ContainerHeader::decode(&raw)?;
            if header.kind != ContainerKind::Data {
                break header;
            }
            // Data for a command that was already answered.
            warn!(
                "Discarding data container for {:#06x} tx {}",
                header.code, header.transaction_id
            );
            self.drain(header.length as usize - HEADER_LEN).await?;
        };
        let body_len = header.length as usize - HEADER_LEN;
        ensure!(
            body_len <= MAX_PARAMS * 4,
            "command container too long ({} bytes)",
            header.length
        );
        let mut body = [0u8; MAX_PARAMS * 4];
        self.stream.read_exact(&mut body[..body_len]).await?;
        let command = CommandContainer::parse(&header, &body[..body_len])?;
        debug!(
            "Command {:#06x} tx {} params {:?}",
            command.code, command.transaction_id, command.params
        );
        Ok(Some(command))
    }

    async fn transact(&mut self, command: &CommandContainer) -> Result<()> {
        self.io.begin_command(command, self.packet_size);
        let cb = CallbackData::new(Phase::Command, *command, 0);
        let reply = self.responder.command_received(&cb, &mut self.io).await;
        debug!("Command {:#06x} -> {:?}", command.code, reply);

        match self.io.take_armed() {
            Some(Armed::Response) => self.write_response().await,
            Some(Armed::DataIn) => self.data_in(command).await,
            Some(Armed::DataOut) => self.data_out(command).await,
            None => bail!("command {:#06x} left without a reply", command.code),
        }
    }

    /// Device to host. The first packet carries the header and whatever
    /// the handler queued; the rest is pulled phase by phase.
    async fn data_in(&mut self, command: &CommandContainer) -> Result<()> {
        let declared = self.io.header.length as usize;
        self.stream.write_all(&self.io.header.encode()).await?;
        self.stream.write_all(self.io.payload()).await?;
        let mut total = HEADER_LEN + self.io.payload().len();

        while total < declared {
            self.io.begin_continuation(self.packet_size);
            let cb = CallbackData::new(Phase::Data, *command, total as u32);
            self.responder.data_xfer(&cb, &mut self.io).await;

            match self.io.take_armed() {
                Some(Armed::DataIn) if !self.io.payload().is_empty() => {
                    let chunk = self.io.payload().len().min(declared - total);
                    self.stream.write_all(&self.io.payload()[..chunk]).await?;
                    total += chunk;
                }
                Some(Armed::Response) => bail!(
                    "command {:#06x} failed with {:#06x} after {} of {} bytes",
                    command.code,
                    self.io.header.code,
                    total,
                    declared
                ),
                _ => bail!("data phase stalled after {} of {} bytes", total, declared),
            }
        }
        self.stream.flush().await?;

        self.complete(command, total, true).await
    }

    /// Host to device. Chunks are delivered while the handler keeps asking
    /// for more; whatever it leaves unread is drained.
    async fn data_out(&mut self, command: &CommandContainer) -> Result<()> {
        let anticipated = self.io.header.length as usize;

        let mut raw = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut raw).await?;
        let header = ContainerHeader::decode(&raw)?;
        ensure!(
            header.kind == ContainerKind::Data && header.code == command.code,
            "expected data for {:#06x}, got {:?} {:#06x}",
            command.code,
            header.kind,
            header.code
        );
        let declared = header.length as usize;
        // Handlers read the host's declared length to know when a dataset is whole.
        self.io.header.length = header.length;
        if anticipated > HEADER_LEN && anticipated != declared {
            warn!(
                "Host sends {} bytes, {} were announced",
                declared - HEADER_LEN,
                anticipated - HEADER_LEN
            );
        }

        let mut total = HEADER_LEN;
        let mut limit = self.packet_size - HEADER_LEN;
        let mut chunk = vec![0u8; self.packet_size];
        let mut wants_more = false;
        loop {
            let n = limit.min(declared - total);
            self.stream.read_exact(&mut chunk[..n]).await?;
            total += n;
            self.io.load_received(&chunk[..n]);

            let cb = CallbackData::new(Phase::Data, *command, total as u32);
            self.responder.data_xfer(&cb, &mut self.io).await;

            match self.io.take_armed() {
                Some(Armed::DataOut) if total < declared => limit = self.packet_size,
                Some(Armed::DataOut) => {
                    wants_more = true;
                    break;
                }
                Some(Armed::Response) => {
                    self.drain(declared - total).await?;
                    return self.write_response().await;
                }
                _ => break,
            }
        }

        let mut xfer_ok = !wants_more;
        if wants_more {
            warn!("Host data for {:#06x} ended early", command.code);
        }
        if total < declared {
            warn!("Discarding {} unconsumed bytes", declared - total);
            self.drain(declared - total).await?;
            xfer_ok = false;
        }
        self.complete(command, total, xfer_ok).await
    }

    async fn complete(
        &mut self,
        command: &CommandContainer,
        total: usize,
        xfer_ok: bool,
    ) -> Result<()> {
        self.io.begin_response(command);
        let mut cb = CallbackData::new(Phase::Response, *command, total as u32);
        cb.xfer_ok = xfer_ok;
        self.responder.data_complete(&cb, &mut self.io).await;
        ensure!(
            self.io.take_armed() == Some(Armed::Response),
            "no response after data phase"
        );
        self.write_response().await
    }

    async fn write_response(&mut self) -> Result<()> {
        self.stream.write_all(&self.io.header.encode()).await?;
        self.stream.write_all(self.io.payload()).await?;
        self.stream.flush().await?;
        let code = self.io.header.code;
        match ResponseCode::from_code(code) {
            Some(known) => debug!("Response {:?} tx {}", known, self.io.header.transaction_id),
            None => debug!("Response {:#06x} tx {}", code, self.io.header.transaction_id),
        }
        Ok(())
    }

    async fn drain(&mut self, len: usize) -> Result<()> {
        let mut limited = (&mut self.stream).take(len as u64);
        let drained = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        ensure!(
            drained == len as u64,
            "host closed with {} bytes owed",
            len as u64 - drained
        );
        Ok(())
    }
}
