use log::{error, info, warn};
use tokio::fs;

use crate::file_info::FileInfo;
use crate::mtp::container::{Container, HEADER_LEN};
use crate::mtp::dataset::{OBJECT_INFO_HEADER_LEN, ObjectInfo};
use crate::mtp::handle_table::truncate_name;
use crate::mtp::session::{CallbackData, CreatedObject, HandlerResult, MtpResponder, Reply};
use crate::mtp::transfer::WriteProgress;
use crate::mtp::types::{
    ASSOCIATION_GENERIC_FOLDER, ASSOCIATION_UNDEFINED, Handle, INVALID_HANDLE, Phase,
    ROOT_HANDLE, ResponseCode, SUPPORTED_STORAGE_ID, WILDCARD,
};
use crate::mtp::utils::path_resolver::is_plain_name;

/// Fixed part plus four strings of the longest encodable length.
const MAX_OBJECT_INFO_LEN: usize = OBJECT_INFO_HEADER_LEN + 4 * (1 + 255 * 2);

pub async fn handle_get_object(
    session: &mut MtpResponder,
    cb: &CallbackData,
    io: &mut Container,
) -> HandlerResult {
    let handle = cb.command.params[0];

    match cb.phase {
        Phase::Command => {
            let (_, metadata, path) = session.stat_handle(handle).await?;
            if metadata.is_dir() {
                warn!("Handle {} is a directory, nothing to read", handle);
                return Err(ResponseCode::InvalidObjectHandle);
            }
            session.transfer.open_for_read(handle, path).await?;
            session.transfer.send_first_chunk(io).await?;
        }
        Phase::Data => {
            let path = session.path_resolver.path_for(&session.table, handle)?;
            session.transfer.open_for_read(handle, path).await?;
            session.transfer.send_next_chunk(cb.total_xferred, io).await?;
        }
        Phase::Response => return Err(ResponseCode::GeneralError),
    }
    Ok(Reply::Pending)
}

pub async fn handle_send_object_info(
    session: &mut MtpResponder,
    cb: &CallbackData,
    io: &mut Container,
) -> HandlerResult {
    let storage_id = cb.command.params[0];
    session.session.require_open()?;
    if storage_id != WILDCARD && storage_id != SUPPORTED_STORAGE_ID {
        warn!("SendObjectInfo: invalid storage ID {:08X}", storage_id);
        return Err(ResponseCode::InvalidStorageId);
    }

    match cb.phase {
        Phase::Command => {
            session.last_created = None;
            session.incoming_info.clear();
            io.data_receive();
            Ok(Reply::Pending)
        }
        Phase::Data => {
            // The driver exposes the host's declared container length here.
            let declared = io.header.length as usize;
            if declared - HEADER_LEN > MAX_OBJECT_INFO_LEN {
                warn!("SendObjectInfo: dataset of {} bytes refused", declared - HEADER_LEN);
                session.incoming_info.clear();
                return Err(ResponseCode::InvalidParameter);
            }
            session.incoming_info.extend_from_slice(io.payload());
            if (cb.total_xferred as usize) < declared {
                io.data_receive();
                return Ok(Reply::Pending);
            }

            let payload = std::mem::take(&mut session.incoming_info);
            let Some(info) = ObjectInfo::parse(&payload) else {
                warn!("SendObjectInfo: malformed dataset ({} bytes)", payload.len());
                return Err(ResponseCode::InvalidParameter);
            };
            if info.storage_id != 0 && info.storage_id != SUPPORTED_STORAGE_ID {
                warn!("SendObjectInfo: dataset names storage {:08X}", info.storage_id);
                return Err(ResponseCode::InvalidStorageId);
            }

            let parent = upload_parent(cb.command.params[1], info.parent_object)?;
            check_parent(session, parent).await?;

            let name = truncate_name(&info.filename);
            if !is_plain_name(&name) {
                warn!("SendObjectInfo: rejecting name {:?}", info.filename);
                return Err(ResponseCode::InvalidParameter);
            }

            match info.association_type {
                ASSOCIATION_UNDEFINED => {
                    create_file(session, parent, &name, info.compressed_size as u64).await?
                }
                ASSOCIATION_GENERIC_FOLDER => create_folder(session, parent, &name).await?,
                other => {
                    error!("Attempting to create unsupported association: {:#06x}", other);
                    return Err(ResponseCode::InvalidParameter);
                }
            }
            Ok(Reply::Pending)
        }
        Phase::Response => Err(ResponseCode::GeneralError),
    }
}

pub async fn handle_send_object(
    session: &mut MtpResponder,
    cb: &CallbackData,
    io: &mut Container,
) -> HandlerResult {
    let Some((handle, remaining)) = session.transfer.pending_write() else {
        warn!("SendObject without a pending object");
        return Err(ResponseCode::InvalidObjectHandle);
    };

    match cb.phase {
        Phase::Command => {
            io.header.length = (HEADER_LEN as u64 + remaining).min(u32::MAX as u64) as u32;
            io.data_receive();
        }
        Phase::Data => {
            let progress = session.transfer.write_chunk(io.payload()).await?;
            match progress {
                WriteProgress::More { remaining } => {
                    info!("Handle {}: {} bytes to go", handle, remaining);
                    io.data_receive();
                }
                WriteProgress::Done => info!("Handle {}: upload complete", handle),
            }
        }
        Phase::Response => return Err(ResponseCode::GeneralError),
    }
    Ok(Reply::Pending)
}

/// Parent of a new object. A command parameter of 0 defers to the dataset;
/// both may name the parent only if they agree. 0xFFFFFFFF is the root.
fn upload_parent(requested: u32, in_dataset: u32) -> Result<Handle, ResponseCode> {
    let in_dataset = match in_dataset {
        WILDCARD => ROOT_HANDLE,
        parent => parent,
    };
    let agrees = in_dataset == ROOT_HANDLE || in_dataset == requested;
    match requested {
        0 => Ok(in_dataset),
        WILDCARD if in_dataset == ROOT_HANDLE => Ok(ROOT_HANDLE),
        WILDCARD => {
            warn!("SendObjectInfo: root in command, {:#x} in dataset", in_dataset);
            Err(ResponseCode::InvalidParentObject)
        }
        requested if agrees => Ok(requested),
        _ => {
            warn!(
                "SendObjectInfo: parent {:#x} in command, {:#x} in dataset",
                requested, in_dataset
            );
            Err(ResponseCode::InvalidParentObject)
        }
    }
}

/// A non-root parent must be an existing first-level directory.
async fn check_parent(session: &MtpResponder, parent: Handle) -> Result<(), ResponseCode> {
    if parent == ROOT_HANDLE {
        return Ok(());
    }
    match session.stat_handle(parent).await {
        Ok((entry, metadata, _)) if metadata.is_dir() && entry.parent == ROOT_HANDLE => Ok(()),
        Ok((entry, _, path)) => {
            error!("Invalid parent {} ({:?}, parent {})", parent, path, entry.parent);
            Err(ResponseCode::InvalidParentObject)
        }
        Err(_) => Err(ResponseCode::InvalidParentObject),
    }
}

async fn create_file(
    session: &mut MtpResponder,
    parent: Handle,
    name: &str,
    size: u64,
) -> Result<(), ResponseCode> {
    if session.table.is_full() {
        warn!("Handle table full, refusing {:?}", name);
        return Err(ResponseCode::StoreFull);
    }
    let usage = session.volume.usage().await.map_err(|e| {
        error!("Failed to measure storage usage: {}", e);
        ResponseCode::GeneralError
    })?;
    if size > usage.free() {
        warn!("{:?} needs {} bytes, {} free", name, size, usage.free());
        return Err(ResponseCode::StoreFull);
    }

    let path = session.path_resolver.create_path(&session.table, parent, name)?;
    let file = FileInfo::create(path.clone()).await.map_err(|e| {
        error!("Failed to open {:?} for write: {}", path, e);
        ResponseCode::GeneralError
    })?;
    let handle = session
        .table
        .insert(parent, name, false)
        .map_err(|_| ResponseCode::StoreFull)?;

    info!("Created file for write, handle={}, path={:?}", handle, path);
    session.transfer.begin_write(handle, file, size).await;
    session.last_created = Some(CreatedObject { parent, handle });
    Ok(())
}

/// Folders exist only directly under the root and get their handle at the
/// next session open.
async fn create_folder(session: &mut MtpResponder, parent: Handle, name: &str) -> Result<(), ResponseCode> {
    if parent != ROOT_HANDLE {
        error!("Attempting to create folder in folder {}", parent);
        return Err(ResponseCode::InvalidParentObject);
    }

    let path = session.path_resolver.create_path(&session.table, ROOT_HANDLE, name)?;
    if let Err(e) = fs::create_dir(&path).await {
        error!("Failed to create directory {:?}: {}", path, e);
        return Err(ResponseCode::GeneralError);
    }
    info!("Created directory {:?}", path);
    session.last_created = Some(CreatedObject {
        parent: ROOT_HANDLE,
        handle: INVALID_HANDLE,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_parent_merges_command_and_dataset() {
        assert_eq!(upload_parent(0, 0), Ok(ROOT_HANDLE));
        assert_eq!(upload_parent(0, WILDCARD), Ok(ROOT_HANDLE));
        assert_eq!(upload_parent(0, 4), Ok(4));
        assert_eq!(upload_parent(WILDCARD, 0), Ok(ROOT_HANDLE));
        assert_eq!(upload_parent(4, 0), Ok(4));
        assert_eq!(upload_parent(4, WILDCARD), Ok(4));
        assert_eq!(upload_parent(4, 4), Ok(4));
        assert_eq!(
            upload_parent(4, 5),
            Err(ResponseCode::InvalidParentObject)
        );
        assert_eq!(
            upload_parent(WILDCARD, 4),
            Err(ResponseCode::InvalidParentObject)
        );
    }
}
