//! Fixed-layout datasets exchanged in data phases.

use super::container::{Container, PayloadReader};
use super::types::*;
use super::utils::volume::VolumeUsage;

/// Size of the fixed part of an ObjectInfo dataset, before its strings.
pub const OBJECT_INFO_HEADER_LEN: usize = 52;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: u16,
    pub protection_status: u16,
    pub compressed_size: u32,
    pub parent_object: u32,
    pub association_type: u16,
    pub filename: String,
    pub date_created: String,
    pub date_modified: String,
}

impl ObjectInfo {
    pub fn write_to(&self, io: &mut Container) {
        io.add_u32(self.storage_id);
        io.add_u16(self.object_format);
        io.add_u16(self.protection_status);
        io.add_u32(self.compressed_size);
        io.add_u16(FORMAT_UNDEFINED); // thumb format
        io.add_u32(0); // thumb compressed size
        io.add_u32(0); // thumb width
        io.add_u32(0); // thumb height
        io.add_u32(0); // image width
        io.add_u32(0); // image height
        io.add_u32(0); // image bit depth
        io.add_u32(self.parent_object);
        io.add_u16(self.association_type);
        io.add_u32(0); // association desc
        io.add_u32(0); // sequence number
        io.add_cstring(&self.filename);
        io.add_cstring(&self.date_created);
        io.add_cstring(&self.date_modified);
        io.add_cstring(""); // keywords
    }

    /// Parses the dataset a host sends ahead of an upload. Dates and
    /// keywords are optional.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < OBJECT_INFO_HEADER_LEN {
            return None;
        }
        let mut reader = PayloadReader::new(payload);
        let storage_id = reader.read_u32()?;
        let object_format = reader.read_u16()?;
        let protection_status = reader.read_u16()?;
        let compressed_size = reader.read_u32()?;
        reader.read_u16()?;
        for _ in 0..6 {
            reader.read_u32()?;
        }
        let parent_object = reader.read_u32()?;
        let association_type = reader.read_u16()?;
        reader.read_u32()?;
        reader.read_u32()?;
        let filename = reader.read_string()?;
        let date_created = reader.read_string().unwrap_or_default();
        let date_modified = reader.read_string().unwrap_or_default();
        Some(Self {
            storage_id,
            object_format,
            protection_status,
            compressed_size,
            parent_object,
            association_type,
            filename,
            date_created,
            date_modified,
        })
    }
}

pub fn write_device_info(io: &mut Container, serial: &str) {
    let operations: Vec<u16> = OPERATIONS.iter().map(|op| op.code()).collect();

    io.add_u16(100); // standard version
    io.add_u32(6); // vendor extension id
    io.add_u16(100); // MTP version
    io.add_cstring("microsoft.com: 1.0; ");
    io.add_u16(0); // functional mode
    io.add_auint16(&operations);
    io.add_auint16(&[]); // events
    io.add_auint16(&[DEV_PROP_FRIENDLY_NAME]);
    io.add_auint16(&[]); // capture formats
    io.add_auint16(&[FORMAT_UNDEFINED, FORMAT_ASSOCIATION]);
    io.add_cstring(DEV_INFO_MANUFACTURER);
    io.add_cstring(DEV_INFO_MODEL);
    io.add_cstring(DEV_INFO_VERSION);
    io.add_cstring(serial);
}

pub fn write_storage_info(io: &mut Container, usage: &VolumeUsage, free_objects: u32) {
    io.add_u16(STORAGE_TYPE_FIXED_RAM);
    io.add_u16(FILESYSTEM_GENERIC_HIERARCHICAL);
    io.add_u16(ACCESS_READ_WRITE);
    io.add_u64(usage.capacity);
    io.add_u64(usage.free());
    io.add_u32(free_objects);
    io.add_cstring(STORAGE_DESCRIPTION);
    io.add_cstring(VOLUME_IDENTIFIER);
}

pub fn write_friendly_name_desc(io: &mut Container, friendly_name: &str) {
    io.add_u16(DEV_PROP_FRIENDLY_NAME);
    io.add_u16(DATA_TYPE_STR);
    io.add_u8(PROP_GET_ONLY);
    io.add_cstring(friendly_name); // factory default
    io.add_cstring(friendly_name); // current
    io.add_u8(0); // no form
}

/// Serial number: hardware id bytes last-first, upper-case hex.
pub fn serial_number(device_id: &[u8]) -> String {
    let reversed: Vec<u8> = device_id.iter().rev().copied().collect();
    let mut serial = hex::encode_upper(reversed);
    serial.truncate(32);
    serial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtp::container::HEADER_LEN;

    fn sample() -> ObjectInfo {
        ObjectInfo {
            storage_id: SUPPORTED_STORAGE_ID,
            object_format: FORMAT_UNDEFINED,
            protection_status: PROTECTION_NONE,
            compressed_size: 2000,
            parent_object: 0,
            association_type: ASSOCIATION_UNDEFINED,
            filename: "x.bin".to_string(),
            date_created: "20250808T173500".to_string(),
            date_modified: String::new(),
        }
    }

    #[test]
    fn object_info_fixed_part_is_52_bytes() {
        let mut io = Container::new(512);
        sample().write_to(&mut io);
        // filename "x.bin" = 1 + 6 * 2 bytes
        assert_eq!(io.payload()[OBJECT_INFO_HEADER_LEN], 6);
        assert_eq!(
            u16::from_le_bytes([io.payload()[42], io.payload()[43]]),
            ASSOCIATION_UNDEFINED
        );
        assert_eq!(io.header.length as usize, HEADER_LEN + io.payload().len());
    }

    #[test]
    fn object_info_parses_what_it_writes() {
        let mut io = Container::new(512);
        sample().write_to(&mut io);
        assert_eq!(ObjectInfo::parse(io.payload()), Some(sample()));
        assert_eq!(ObjectInfo::parse(&io.payload()[..40]), None);
    }

    #[test]
    fn serial_is_reversed_hex_without_separators() {
        assert_eq!(
            serial_number(&[0x24, 0x6f, 0x28, 0xa1, 0xb2, 0xc3]),
            "C3B2A1286F24"
        );
    }

    #[test]
    fn friendly_name_desc_layout() {
        let mut io = Container::new(512);
        write_friendly_name_desc(&mut io, "Dev");
        let p = io.payload();
        assert_eq!(&p[..5], &[0x02, 0xD4, 0xFF, 0xFF, 0x00]);
        assert_eq!(p[5], 4);
        assert_eq!(*p.last().unwrap(), 0);
        // header(5) + two strings of 1 + 4 * 2 + form flag
        assert_eq!(p.len(), 5 + 9 + 9 + 1);
    }
}
