use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::fs;

use crate::server::ServerConfig;

use super::{
    SessionState,
    container::{CommandContainer, Container},
    dataset::serial_number,
    handle_table::{HandleEntry, HandleTable},
    handlers::{device_ops, dir_ops, file_ops},
    transfer::TransferEngine,
    types::{Handle, Operation, Phase, ResponseCode, SUPPORTED_STORAGE_ID},
    utils::{path_resolver::PathResolver, volume::Volume},
};

/// What the driver passes on every re-entry of a logical operation.
#[derive(Debug, Clone, Copy)]
pub struct CallbackData {
    pub phase: Phase,
    pub command: CommandContainer,
    /// Bytes moved so far in the current data phase, header included.
    pub total_xferred: u32,
    /// False when host data ran short of what the handler asked for, or
    /// carried bytes it never consumed.
    pub xfer_ok: bool,
}

impl CallbackData {
    pub fn new(phase: Phase, command: CommandContainer, total_xferred: u32) -> Self {
        Self {
            phase,
            command,
            total_xferred,
            xfer_ok: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// The dispatcher stamps the code and sends the response.
    Respond(ResponseCode),
    /// The handler armed a data phase; no response yet.
    Pending,
}

pub type HandlerResult = Result<Reply, ResponseCode>;

/// Object created by the last SendObjectInfo, reported at data-complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CreatedObject {
    pub parent: Handle,
    pub handle: Handle,
}

/// Device-side responder: owns the session, the handle table and the
/// transfer in flight, and routes every callback to its handler.
pub struct MtpResponder {
    pub(crate) session: SessionState,
    pub(crate) table: HandleTable,
    pub(crate) transfer: TransferEngine,
    pub(crate) path_resolver: PathResolver,
    pub(crate) volume: Volume,
    pub(crate) friendly_name: String,
    pub(crate) serial: String,
    pub(crate) last_created: Option<CreatedObject>,
    /// ObjectInfo dataset collected across the data phases of SendObjectInfo.
    pub(crate) incoming_info: Vec<u8>,
}

impl MtpResponder {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            session: SessionState::Closed,
            table: HandleTable::new(),
            transfer: TransferEngine::new(config.packet_size),
            path_resolver: PathResolver::new(config.root_dir.clone()),
            volume: Volume::new(config.root_dir.clone(), config.capacity),
            friendly_name: config.friendly_name.clone(),
            serial: serial_number(&config.device_id),
            last_created: None,
            incoming_info: Vec::new(),
        }
    }

    pub fn staging_capacity(&self) -> usize {
        self.transfer.staging_capacity()
    }

    pub fn table(&self) -> &HandleTable {
        &self.table
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    /// Entry point for a freshly received command.
    pub async fn command_received(&mut self, cb: &CallbackData, io: &mut Container) -> Reply {
        let outcome = match Operation::from_code(cb.command.code) {
            Some(op) => self.dispatch(op, cb, io).await,
            None => {
                warn!("Operation {:#06x} not supported", cb.command.code);
                Err(ResponseCode::OperationNotSupported)
            }
        };
        settle(io, outcome)
    }

    /// Entry point for every data-phase delivery of the current command.
    pub async fn data_xfer(&mut self, cb: &CallbackData, io: &mut Container) -> Reply {
        let outcome = match Operation::from_code(cb.command.code) {
            Some(op) => self.dispatch(op, cb, io).await,
            None => Err(ResponseCode::OperationNotSupported),
        };
        settle(io, outcome)
    }

    /// Entry point once all declared data bytes have moved. Always answers.
    pub async fn data_complete(&mut self, cb: &CallbackData, io: &mut Container) {
        let code = match Operation::from_code(cb.command.code) {
            Some(Operation::SendObjectInfo) => match self.last_created.take() {
                Some(created) => {
                    // storage id, parent handle, new handle
                    io.add_u32(SUPPORTED_STORAGE_ID);
                    io.add_u32(created.parent);
                    io.add_u32(created.handle);
                    ResponseCode::Ok
                }
                None => ResponseCode::InvalidObjectHandle,
            },
            _ if cb.xfer_ok => ResponseCode::Ok,
            _ => {
                warn!("Data phase of {:#06x} incomplete", cb.command.code);
                self.transfer.release().await;
                ResponseCode::GeneralError
            }
        };
        io.response_send(code);
    }

    /// Transport-level cancel: drops the open file, keeps whatever was
    /// written.
    pub async fn cancel(&mut self, transaction_id: u32) {
        info!("Cancel transaction {}", transaction_id);
        self.transfer.release().await;
        self.last_created = None;
        self.incoming_info.clear();
    }

    pub async fn device_reset(&mut self) {
        self.transfer.release().await;
        self.last_created = None;
        self.incoming_info.clear();
        if self.session.close().is_ok() {
            info!("Device reset closed the session");
            self.table.reset_counter();
        }
    }

    async fn dispatch(&mut self, op: Operation, cb: &CallbackData, io: &mut Container) -> HandlerResult {
        debug!("{:?} in {:?} phase", op, cb.phase);
        match op {
            Operation::GetDeviceInfo => device_ops::handle_get_device_info(self, io).await,
            Operation::OpenSession | Operation::CloseSession => {
                device_ops::handle_open_close_session(self, op, cb).await
            }
            Operation::GetStorageIds => device_ops::handle_get_storage_ids(io).await,
            Operation::GetStorageInfo => device_ops::handle_get_storage_info(self, cb, io).await,
            Operation::GetDevicePropDesc | Operation::GetDevicePropValue => {
                device_ops::handle_get_device_properties(self, op, cb, io).await
            }
            Operation::GetObjectHandles => dir_ops::handle_get_object_handles(self, cb, io).await,
            Operation::GetObjectInfo => dir_ops::handle_get_object_info(self, cb, io).await,
            Operation::DeleteObject => dir_ops::handle_delete_object(self, cb).await,
            Operation::GetObject => file_ops::handle_get_object(self, cb, io).await,
            Operation::SendObjectInfo => file_ops::handle_send_object_info(self, cb, io).await,
            Operation::SendObject => file_ops::handle_send_object(self, cb, io).await,
        }
    }

    /// Resolves and stats an object. Anything unknown is an invalid handle.
    pub(crate) async fn stat_handle(
        &self,
        handle: Handle,
    ) -> Result<(HandleEntry, std::fs::Metadata, PathBuf), ResponseCode> {
        let path = self.path_resolver.path_for(&self.table, handle)?;
        let entry = self
            .table
            .find(handle)
            .cloned()
            .ok_or(ResponseCode::InvalidObjectHandle)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok((entry, metadata, path)),
            Err(e) => {
                error!("Failed to stat handle {} ({:?}): {}", handle, path, e);
                Err(ResponseCode::InvalidObjectHandle)
            }
        }
    }
}

/// Sends the response for codes that need one. Pending replies leave the
/// container armed as the handler left it.
fn settle(io: &mut Container, outcome: HandlerResult) -> Reply {
    let reply = outcome.unwrap_or_else(Reply::Respond);
    if let Reply::Respond(code) = reply {
        if code.needs_response() {
            io.clear_payload();
            io.response_send(code);
        }
    }
    reply
}
