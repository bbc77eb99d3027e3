/// Object handle, unique within a session.
pub type Handle = u32;

/// Handle of the root container.
pub const ROOT_HANDLE: Handle = 0;
/// "No object" marker.
pub const INVALID_HANDLE: Handle = u32::MAX;
/// Parent/storage wildcard. As a parent it means the root.
pub const WILDCARD: u32 = 0xFFFF_FFFF;

/// The only storage exposed: physical 1, logical 1.
pub const SUPPORTED_STORAGE_ID: u32 = 0x0001_0001;

pub const HANDLE_TABLE_CAPACITY: usize = 32;
pub const MAX_NAME_LEN: usize = 63;

pub const DEV_INFO_MANUFACTURER: &str = "RustedBytes";
pub const DEV_INFO_MODEL: &str = "MTP Responder";
pub const DEV_INFO_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STORAGE_DESCRIPTION: &str = "disk";
pub const VOLUME_IDENTIFIER: &str = "vol";

pub const DEV_PROP_FRIENDLY_NAME: u16 = 0xD402;
pub const DATA_TYPE_STR: u16 = 0xFFFF;
pub const PROP_GET_ONLY: u8 = 0x00;

pub const FORMAT_UNDEFINED: u16 = 0x3000;
pub const FORMAT_ASSOCIATION: u16 = 0x3001;

pub const ASSOCIATION_UNDEFINED: u16 = 0x0000;
pub const ASSOCIATION_GENERIC_FOLDER: u16 = 0x0001;

pub const PROTECTION_NONE: u16 = 0x0000;

pub const STORAGE_TYPE_FIXED_RAM: u16 = 0x0003;
pub const FILESYSTEM_GENERIC_HIERARCHICAL: u16 = 0x0002;
pub const ACCESS_READ_WRITE: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    Undefined = 0x2000,
    Ok = 0x2001,
    GeneralError = 0x2002,
    SessionNotOpen = 0x2003,
    OperationNotSupported = 0x2005,
    ParameterNotSupported = 0x2006,
    InvalidStorageId = 0x2008,
    InvalidObjectHandle = 0x2009,
    StoreFull = 0x200C,
    InvalidParentObject = 0x201A,
    InvalidParameter = 0x201D,
    SessionAlreadyOpen = 0x201E,
}

impl ResponseCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Codes above `Undefined` are stamped into a response by the dispatcher.
    /// `Undefined` itself means the handler already armed the transport.
    pub fn needs_response(self) -> bool {
        self.code() > ResponseCode::Undefined.code()
    }

    pub fn from_code(code: u16) -> Option<Self> {
        use ResponseCode::*;
        [
            Undefined,
            Ok,
            GeneralError,
            SessionNotOpen,
            OperationNotSupported,
            ParameterNotSupported,
            InvalidStorageId,
            InvalidObjectHandle,
            StoreFull,
            InvalidParentObject,
            InvalidParameter,
            SessionAlreadyOpen,
        ]
        .into_iter()
        .find(|r| r.code() == code)
    }
}

/// Operations this responder answers. Anything else is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetDeviceInfo,
    OpenSession,
    CloseSession,
    GetStorageIds,
    GetStorageInfo,
    GetDevicePropDesc,
    GetDevicePropValue,
    GetObjectHandles,
    GetObjectInfo,
    GetObject,
    DeleteObject,
    SendObjectInfo,
    SendObject,
}

pub const OPERATIONS: [Operation; 13] = [
    Operation::GetDeviceInfo,
    Operation::OpenSession,
    Operation::CloseSession,
    Operation::GetStorageIds,
    Operation::GetStorageInfo,
    Operation::GetDevicePropDesc,
    Operation::GetDevicePropValue,
    Operation::GetObjectHandles,
    Operation::GetObjectInfo,
    Operation::GetObject,
    Operation::DeleteObject,
    Operation::SendObjectInfo,
    Operation::SendObject,
];

impl Operation {
    pub fn code(self) -> u16 {
        match self {
            Operation::GetDeviceInfo => 0x1001,
            Operation::OpenSession => 0x1002,
            Operation::CloseSession => 0x1003,
            Operation::GetStorageIds => 0x1004,
            Operation::GetStorageInfo => 0x1005,
            Operation::GetObjectHandles => 0x1007,
            Operation::GetObjectInfo => 0x1008,
            Operation::GetObject => 0x1009,
            Operation::DeleteObject => 0x100B,
            Operation::SendObjectInfo => 0x100C,
            Operation::SendObject => 0x100D,
            Operation::GetDevicePropDesc => 0x1014,
            Operation::GetDevicePropValue => 0x1015,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        OPERATIONS.iter().copied().find(|op| op.code() == code)
    }
}

/// Point of a logical exchange at which the driver re-enters the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Command,
    Data,
    /// Only seen by `MtpResponder::data_complete`; handlers are never
    /// dispatched in this phase.
    Response,
}
