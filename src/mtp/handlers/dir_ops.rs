use log::{error, info, warn};
use tokio::fs;

use crate::mtp::container::Container;
use crate::mtp::session::{CallbackData, HandlerResult, MtpResponder, Reply};
use crate::mtp::types::{ROOT_HANDLE, ResponseCode, SUPPORTED_STORAGE_ID, WILDCARD};
use crate::mtp::utils::metadata::MetadataConverter;

pub async fn handle_get_object_handles(
    session: &mut MtpResponder,
    cb: &CallbackData,
    io: &mut Container,
) -> HandlerResult {
    let storage_id = cb.command.params[0];
    // params[1] is an optional format filter, not applied
    let parent = cb.command.params[2];

    if storage_id != WILDCARD && storage_id != SUPPORTED_STORAGE_ID {
        return Err(ResponseCode::InvalidStorageId);
    }

    let parent = if parent == WILDCARD { ROOT_HANDLE } else { parent };
    let handles = session.table.children(parent);
    info!("Reported {} objects under {}", handles.len(), parent);

    io.add_auint32(&handles);
    io.data_send();
    Ok(Reply::Pending)
}

pub async fn handle_get_object_info(
    session: &mut MtpResponder,
    cb: &CallbackData,
    io: &mut Container,
) -> HandlerResult {
    let handle = cb.command.params[0];
    let (entry, metadata, _) = session.stat_handle(handle).await?;

    let info = MetadataConverter::to_object_info(&entry, &metadata);
    info!("Reported {}: {}, size={}", handle, info.filename, info.compressed_size);
    info.write_to(io);
    io.data_send();
    Ok(Reply::Pending)
}

pub async fn handle_delete_object(session: &mut MtpResponder, cb: &CallbackData) -> HandlerResult {
    let handle = cb.command.params[0];
    session.session.require_open()?;

    let path = session.path_resolver.path_for(&session.table, handle)?;
    let metadata = match fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("Failed to stat {:?} for deletion: {}", path, e);
            return Err(ResponseCode::GeneralError);
        }
    };

    if metadata.is_dir() {
        warn!("Refusing to delete directory {:?}", path);
        return Err(ResponseCode::OperationNotSupported);
    }

    if session.transfer.active_handle() == Some(handle) {
        session.transfer.release().await;
    }
    if let Err(e) = fs::remove_file(&path).await {
        error!("Failed to delete {:?}: {}", path, e);
        return Err(ResponseCode::GeneralError);
    }
    session.table.remove(handle);
    info!("Deleted handle {} ({:?})", handle, path);

    Ok(Reply::Respond(ResponseCode::Ok))
}
