use log::{error, info, warn};

use crate::mtp::container::Container;
use crate::mtp::dataset::{write_device_info, write_friendly_name_desc, write_storage_info};
use crate::mtp::session::{CallbackData, HandlerResult, MtpResponder, Reply};
use crate::mtp::types::{DEV_PROP_FRIENDLY_NAME, Operation, ResponseCode, SUPPORTED_STORAGE_ID};

pub async fn handle_get_device_info(session: &mut MtpResponder, io: &mut Container) -> HandlerResult {
    write_device_info(io, &session.serial);
    io.data_send();
    Ok(Reply::Pending)
}

pub async fn handle_open_close_session(
    session: &mut MtpResponder,
    op: Operation,
    cb: &CallbackData,
) -> HandlerResult {
    if op == Operation::OpenSession {
        let id = cb.command.params[0];
        session.session.open(id)?;
        session.transfer.release().await;

        // Handles are rebuilt from the filesystem on every open.
        let root = session.path_resolver.get_root_dir().to_path_buf();
        session.table.regenerate(&root).await;
        info!(
            "Session {} opened, {} objects in handle table",
            id,
            session.table.used()
        );
    } else {
        session.session.close()?;
        session.transfer.release().await;
        session.last_created = None;
        session.table.reset_counter();
        info!("Session closed");
    }
    Ok(Reply::Respond(ResponseCode::Ok))
}

pub async fn handle_get_storage_ids(io: &mut Container) -> HandlerResult {
    io.add_auint32(&[SUPPORTED_STORAGE_ID]);
    io.data_send();
    Ok(Reply::Pending)
}

pub async fn handle_get_storage_info(
    session: &mut MtpResponder,
    cb: &CallbackData,
    io: &mut Container,
) -> HandlerResult {
    let storage_id = cb.command.params[0];
    if storage_id != SUPPORTED_STORAGE_ID {
        warn!("Storage info requested for unknown storage {:08X}", storage_id);
        return Err(ResponseCode::InvalidStorageId);
    }

    let usage = session.volume.usage().await.map_err(|e| {
        error!("Failed to measure storage usage: {}", e);
        ResponseCode::GeneralError
    })?;
    write_storage_info(io, &usage, session.table.free_slots() as u32);
    io.data_send();
    Ok(Reply::Pending)
}

pub async fn handle_get_device_properties(
    session: &mut MtpResponder,
    op: Operation,
    cb: &CallbackData,
    io: &mut Container,
) -> HandlerResult {
    let prop_code = cb.command.params[0] as u16;
    if prop_code != DEV_PROP_FRIENDLY_NAME {
        warn!("Device property {:#06x} not supported", prop_code);
        return Err(ResponseCode::ParameterNotSupported);
    }

    if op == Operation::GetDevicePropDesc {
        write_friendly_name_desc(io, &session.friendly_name);
    } else {
        io.add_cstring(&session.friendly_name);
    }
    io.data_send();
    Ok(Reply::Pending)
}
