//! Bulk container framing shared by the driver and the handlers.
//!
//! Every exchange starts with a command container. Data and response
//! containers reuse one [`Container`] that handlers append typed fields to
//! and then hand back to the driver by arming it.

use anyhow::{Result, bail};

use super::types::ResponseCode;

pub const HEADER_LEN: usize = 12;
pub const MAX_PARAMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContainerKind {
    Command = 1,
    Data = 2,
    Response = 3,
}

impl ContainerKind {
    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(ContainerKind::Command),
            2 => Some(ContainerKind::Data),
            3 => Some(ContainerKind::Response),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub length: u32,
    pub kind: ContainerKind,
    pub code: u16,
    pub transaction_id: u32,
}

impl ContainerHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..6].copy_from_slice(&(self.kind as u16).to_le_bytes());
        out[6..8].copy_from_slice(&self.code.to_le_bytes());
        out[8..12].copy_from_slice(&self.transaction_id.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        let length = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let kind_raw = u16::from_le_bytes([raw[4], raw[5]]);
        let Some(kind) = ContainerKind::from_raw(kind_raw) else {
            bail!("unknown container type {kind_raw:#06x}");
        };
        if (length as usize) < HEADER_LEN {
            bail!("container length {length} shorter than its header");
        }
        Ok(Self {
            length,
            kind,
            code: u16::from_le_bytes([raw[6], raw[7]]),
            transaction_id: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
        })
    }
}

/// Decoded command: operation code and up to five parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandContainer {
    pub code: u16,
    pub transaction_id: u32,
    pub params: [u32; MAX_PARAMS],
}

impl CommandContainer {
    pub fn parse(header: &ContainerHeader, body: &[u8]) -> Result<Self> {
        if header.kind != ContainerKind::Command {
            bail!("expected a command container, got {:?}", header.kind);
        }
        if body.len() % 4 != 0 || body.len() / 4 > MAX_PARAMS {
            bail!("malformed command parameters ({} bytes)", body.len());
        }
        let mut params = [0u32; MAX_PARAMS];
        for (slot, chunk) in params.iter_mut().zip(body.chunks_exact(4)) {
            *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self {
            code: header.code,
            transaction_id: header.transaction_id,
            params,
        })
    }
}

/// What a handler asked the driver to do with the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armed {
    DataIn,
    DataOut,
    Response,
}

#[derive(Debug)]
pub struct Container {
    pub header: ContainerHeader,
    payload: Vec<u8>,
    capacity: usize,
    armed: Option<Armed>,
}

impl Container {
    pub fn new(packet_size: usize) -> Self {
        Self {
            header: ContainerHeader {
                length: HEADER_LEN as u32,
                kind: ContainerKind::Data,
                code: 0,
                transaction_id: 0,
            },
            payload: Vec::with_capacity(packet_size),
            capacity: packet_size.saturating_sub(HEADER_LEN),
            armed: None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes the current phase can physically carry.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear_payload(&mut self) {
        self.payload.clear();
        self.header.length = HEADER_LEN as u32;
    }

    /// Resizes the payload to `len` bytes for a continuation packet and
    /// returns it for filling. The header length is left alone.
    pub fn payload_mut(&mut self, len: usize) -> &mut [u8] {
        self.payload.resize(len, 0);
        &mut self.payload
    }

    pub fn add_raw(&mut self, data: &[u8]) {
        self.payload.extend_from_slice(data);
        self.header.length += data.len() as u32;
    }

    /// Declares `declared` payload bytes while queueing only what fits of
    /// `prefix`. The driver pulls the rest through later data phases.
    pub fn add_raw_partial(&mut self, prefix: &[u8], declared: usize) -> usize {
        let room = self.capacity.saturating_sub(self.payload.len());
        let queued = prefix.len().min(declared).min(room);
        self.payload.extend_from_slice(&prefix[..queued]);
        self.header.length += declared as u32;
        queued
    }

    pub fn add_u8(&mut self, value: u8) {
        self.add_raw(&[value]);
    }

    pub fn add_u16(&mut self, value: u16) {
        self.add_raw(&value.to_le_bytes());
    }

    pub fn add_u32(&mut self, value: u32) {
        self.add_raw(&value.to_le_bytes());
    }

    pub fn add_u64(&mut self, value: u64) {
        self.add_raw(&value.to_le_bytes());
    }

    pub fn add_auint16(&mut self, values: &[u16]) {
        self.add_u32(values.len() as u32);
        for value in values {
            self.add_u16(*value);
        }
    }

    pub fn add_auint32(&mut self, values: &[u32]) {
        self.add_u32(values.len() as u32);
        for value in values {
            self.add_u32(*value);
        }
    }

    /// Appends a narrow string as a length-prefixed wide string.
    pub fn add_cstring(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.add_string(&units);
    }

    /// Appends UTF-16 code units (without terminator) as a length-prefixed
    /// wide string. The count byte includes the terminator; an empty string
    /// is a single zero byte.
    pub fn add_string(&mut self, units: &[u16]) {
        if units.is_empty() {
            self.add_u8(0);
            return;
        }
        let units = &units[..units.len().min(254)];
        self.add_u8(units.len() as u8 + 1);
        for unit in units {
            self.add_u16(*unit);
        }
        self.add_u16(0);
    }

    pub fn data_send(&mut self) {
        self.armed = Some(Armed::DataIn);
    }

    pub fn data_receive(&mut self) {
        self.armed = Some(Armed::DataOut);
    }

    /// Stamps `code` and turns the container into a response carrying the
    /// current payload as its parameters.
    pub fn response_send(&mut self, code: ResponseCode) {
        self.header.kind = ContainerKind::Response;
        self.header.code = code.code();
        self.header.length = (HEADER_LEN + self.payload.len()) as u32;
        self.armed = Some(Armed::Response);
    }

    pub(crate) fn take_armed(&mut self) -> Option<Armed> {
        self.armed.take()
    }

    pub(crate) fn begin_command(&mut self, command: &CommandContainer, packet_size: usize) {
        self.header = ContainerHeader {
            length: HEADER_LEN as u32,
            kind: ContainerKind::Data,
            code: command.code,
            transaction_id: command.transaction_id,
        };
        self.payload.clear();
        self.capacity = packet_size - HEADER_LEN;
        self.armed = None;
    }

    pub(crate) fn begin_continuation(&mut self, packet_size: usize) {
        self.payload.clear();
        self.capacity = packet_size;
        self.armed = None;
    }

    pub(crate) fn load_received(&mut self, chunk: &[u8]) {
        self.payload.clear();
        self.payload.extend_from_slice(chunk);
        self.armed = None;
    }

    pub(crate) fn begin_response(&mut self, command: &CommandContainer) {
        self.header = ContainerHeader {
            length: HEADER_LEN as u32,
            kind: ContainerKind::Response,
            code: ResponseCode::Undefined.code(),
            transaction_id: command.transaction_id,
        };
        self.payload.clear();
        self.armed = None;
    }
}

/// Cursor over a received payload.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a length-prefixed wide string, dropping the terminator.
    pub fn read_string(&mut self) -> Option<String> {
        let count = self.read_u8()? as usize;
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            units.push(self.read_u16()?);
        }
        while units.last() == Some(&0) {
            units.pop();
        }
        Some(String::from_utf16_lossy(&units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encodes_little_endian() {
        let header = ContainerHeader {
            length: 0x18,
            kind: ContainerKind::Response,
            code: 0x2001,
            transaction_id: 7,
        };
        let raw = header.encode();
        assert_eq!(raw, [0x18, 0, 0, 0, 3, 0, 0x01, 0x20, 7, 0, 0, 0]);
        assert_eq!(ContainerHeader::decode(&raw).unwrap(), header);
    }

    #[test]
    fn header_rejects_unknown_kind_and_short_length() {
        let mut raw = [12u8, 0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 0];
        assert!(ContainerHeader::decode(&raw).is_err());
        raw[0] = 4;
        raw[4] = 1;
        assert!(ContainerHeader::decode(&raw).is_err());
    }

    #[test]
    fn command_parameters_are_decoded_in_order() {
        let header = ContainerHeader {
            length: 20,
            kind: ContainerKind::Command,
            code: 0x1007,
            transaction_id: 3,
        };
        let body = [1u8, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF];
        let command = CommandContainer::parse(&header, &body).unwrap();
        assert_eq!(command.params, [1, 0xFFFF_FFFF, 0, 0, 0]);
        assert!(CommandContainer::parse(&header, &[0u8; 24]).is_err());
    }

    #[test]
    fn strings_carry_count_with_terminator() {
        let mut io = Container::new(512);
        io.add_cstring("ab");
        io.add_cstring("");
        assert_eq!(io.payload(), &[3, b'a', 0, b'b', 0, 0, 0, 0]);
        assert_eq!(io.header.length as usize, HEADER_LEN + 8);

        let mut reader = PayloadReader::new(io.payload());
        assert_eq!(reader.read_string().as_deref(), Some("ab"));
        assert_eq!(reader.read_string().as_deref(), Some(""));
        assert_eq!(reader.read_u8(), None);
    }

    #[test]
    fn partial_add_declares_more_than_it_queues() {
        let mut io = Container::new(64);
        let data = [7u8; 100];
        let queued = io.add_raw_partial(&data, 100);
        assert_eq!(queued, 64 - HEADER_LEN);
        assert_eq!(io.payload().len(), queued);
        assert_eq!(io.header.length as usize, HEADER_LEN + 100);
    }

    #[test]
    fn response_send_uses_payload_as_parameters() {
        let mut io = Container::new(64);
        io.add_u32(0x0001_0001);
        io.add_u32(5);
        io.response_send(ResponseCode::Ok);
        assert_eq!(io.header.kind, ContainerKind::Response);
        assert_eq!(io.header.length, 20);
        assert_eq!(io.take_armed(), Some(Armed::Response));
        assert_eq!(io.take_armed(), None);
    }
}
