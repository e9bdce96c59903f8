// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Protocol Data Unit codec: builders and parsers for all 19 public
//! Modbus function codes, independent of the transport that carries them.

mod device_id;
mod file_record;

pub use device_id::{object_id, DeviceIdentification};
pub use file_record::{FileRecordData, FileRecordWrite, ReadFileRecordRequest};

/// A Modbus function code.
pub type FunctionCode = u8;

/// A Modbus protocol address, 0-based.
pub type Address = u16;

/// A single bit: coil or discrete input.
pub type Coil = bool;

/// A 16-bit Modbus data item (register).
pub type Word = u16;

/// A count of items to read or write.
pub type Quantity = u16;

/// Diagnostic sub-function codes (FC 0x08), non-exhaustive per the spec.
pub mod diagnostics_subfunction {
    pub const RETURN_QUERY_DATA: u16 = 0x00;
    pub const RESTART_COMMUNICATIONS: u16 = 0x01;
    pub const RETURN_DIAGNOSTIC_REGISTER: u16 = 0x02;
    pub const CHANGE_ASCII_INPUT_DELIMITER: u16 = 0x03;
    pub const FORCE_LISTEN_ONLY_MODE: u16 = 0x04;
    pub const CLEAR_COUNTERS: u16 = 0x0A;
    pub const CLEAR_OVERRUN_COUNTER: u16 = 0x14;
}

/// A server (slave) protocol-level exception, distinct from transport
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
}

impl Exception {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::IllegalFunction => 1,
            Self::IllegalDataAddress => 2,
            Self::IllegalDataValue => 3,
            Self::SlaveDeviceFailure => 4,
            Self::Acknowledge => 5,
            Self::SlaveDeviceBusy => 6,
            Self::NegativeAcknowledge => 7,
            Self::MemoryParityError => 8,
            Self::GatewayPathUnavailable => 10,
            Self::GatewayTargetFailedToRespond => 11,
        }
    }

    fn from_known_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::IllegalFunction,
            2 => Self::IllegalDataAddress,
            3 => Self::IllegalDataValue,
            4 => Self::SlaveDeviceFailure,
            5 => Self::Acknowledge,
            6 => Self::SlaveDeviceBusy,
            7 => Self::NegativeAcknowledge,
            8 => Self::MemoryParityError,
            10 => Self::GatewayPathUnavailable,
            11 => Self::GatewayTargetFailedToRespond,
            _ => return None,
        })
    }

    fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::SlaveDeviceFailure => "slave device failure",
            Self::Acknowledge => "acknowledge",
            Self::SlaveDeviceBusy => "slave device busy",
            Self::NegativeAcknowledge => "negative acknowledge",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailedToRespond => "gateway target device failed to respond",
        }
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A server exception response: the function code that was rejected, paired
/// with the reported exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Modbus function {function:#04X}: {exception}")]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: Exception,
}

/// Errors produced while building or parsing a PDU.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PduError {
    #[error("PDU too short: expected at least {expected} bytes, got {got}")]
    PduTooShort { expected: usize, got: usize },

    #[error("unexpected function code: expected {expected:#04X}, got {got:#04X}")]
    UnexpectedFunctionCode {
        expected: FunctionCode,
        got: FunctionCode,
    },

    #[error("byte count mismatch: expected {expected}, got {got}")]
    ByteCountMismatch { expected: usize, got: usize },

    #[error("{0}")]
    Exception(#[from] ExceptionResponse),

    #[error("unknown exception code {0:#04X} for function {1:#04X}")]
    UnknownException(u8, FunctionCode),

    #[error("invalid MEI type {0:#04X}, expected 0x0E")]
    InvalidMeiType(u8),

    #[error("invalid file reference type {0:#04X}, expected 0x06")]
    InvalidFileReferenceType(u8),

    #[error("odd record data length {0}")]
    OddRecordDataLength(usize),
}

/// A request from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    ReadInputRegisters(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Vec<Coil>),
    WriteMultipleRegisters(Address, Vec<Word>),
    ReadExceptionStatus,
    Diagnostics(u16, [u8; 2]),
    GetCommEventCounter,
    GetCommEventLog,
    ReportServerId,
    ReadFileRecord(Vec<ReadFileRecordRequest>),
    WriteFileRecord(Vec<FileRecordWrite>),
    MaskWriteRegister(Address, u16, u16),
    ReadWriteMultipleRegisters(Address, Quantity, Address, Vec<Word>),
    ReadFifoQueue(Address),
    ReadDeviceIdentification(u8, u8),
    Custom(FunctionCode, Vec<u8>),
}

/// The comm-event log payload (FC 0x0C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommEventLog {
    pub status: u16,
    pub event_count: u16,
    pub message_count: u16,
    pub events: Vec<u8>,
}

/// The report-server-ID payload (FC 0x11).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerId {
    pub server_id: Vec<u8>,
    pub run_indicator_on: bool,
}

/// A successful response from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    ReadHoldingRegisters(Vec<Word>),
    ReadInputRegisters(Vec<Word>),
    WriteSingleCoil(Address),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Quantity),
    WriteMultipleRegisters(Address, Quantity),
    ReadExceptionStatus(u8),
    Diagnostics(u16, [u8; 2]),
    GetCommEventCounter(u16, u16),
    GetCommEventLog(CommEventLog),
    ReportServerId(ServerId),
    ReadFileRecord(Vec<FileRecordData>),
    WriteFileRecord(Vec<FileRecordWrite>),
    MaskWriteRegister(Address, u16, u16),
    ReadWriteMultipleRegisters(Vec<Word>),
    ReadFifoQueue(Vec<Word>),
    ReadDeviceIdentification(DeviceIdentification),
    Custom(FunctionCode, Vec<u8>),
}

/// Returns the function code a request will be sent under.
#[must_use]
pub fn function_code_of(request: &Request) -> FunctionCode {
    match request {
        Request::ReadCoils(..) => 0x01,
        Request::ReadDiscreteInputs(..) => 0x02,
        Request::ReadHoldingRegisters(..) => 0x03,
        Request::ReadInputRegisters(..) => 0x04,
        Request::WriteSingleCoil(..) => 0x05,
        Request::WriteSingleRegister(..) => 0x06,
        Request::ReadExceptionStatus => 0x07,
        Request::Diagnostics(..) => 0x08,
        Request::GetCommEventCounter => 0x0B,
        Request::GetCommEventLog => 0x0C,
        Request::WriteMultipleCoils(..) => 0x0F,
        Request::WriteMultipleRegisters(..) => 0x10,
        Request::ReportServerId => 0x11,
        Request::ReadFileRecord(..) => 0x14,
        Request::WriteFileRecord(..) => 0x15,
        Request::MaskWriteRegister(..) => 0x16,
        Request::ReadWriteMultipleRegisters(..) => 0x17,
        Request::ReadFifoQueue(..) => 0x18,
        Request::ReadDeviceIdentification(..) => 0x2B,
        Request::Custom(fc, _) => *fc,
    }
}

/// Validates `request` against the hard quantitative invariants of the
/// protocol, returning a human-readable reason on failure. Callers are
/// expected to surface this as `Error::InvalidParameter` without retrying.
pub fn validate_request(request: &Request) -> Result<(), String> {
    fn in_range(value: usize, range: std::ops::RangeInclusive<usize>, what: &str) -> Result<(), String> {
        if range.contains(&value) {
            Ok(())
        } else {
            Err(format!(
                "{what} out of range: {value} (expected {}..={})",
                range.start(),
                range.end()
            ))
        }
    }

    match request {
        Request::ReadCoils(_, count) | Request::ReadDiscreteInputs(_, count) => {
            in_range(*count as usize, 1..=2000, "bit count")
        }
        Request::ReadHoldingRegisters(_, count) | Request::ReadInputRegisters(_, count) => {
            in_range(*count as usize, 1..=125, "register count")
        }
        Request::WriteMultipleCoils(_, coils) => in_range(coils.len(), 1..=1968, "coil count"),
        Request::WriteMultipleRegisters(_, words) => {
            in_range(words.len(), 1..=123, "register count")
        }
        Request::ReadWriteMultipleRegisters(_, read_count, _, write_words) => {
            in_range(*read_count as usize, 1..=125, "read register count")?;
            in_range(write_words.len(), 1..=121, "write register count")
        }
        Request::ReadFileRecord(records) => {
            for record in records {
                if record.record_length == 0 {
                    return Err("file record length must be nonzero".to_owned());
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Builds the PDU bytes for `request`. Building is pure and idempotent:
/// calling this twice with equal `request`s yields byte-identical output.
#[must_use]
pub fn build_request(request: &Request) -> Vec<u8> {
    match request {
        Request::ReadCoils(addr, count) => build_read(0x01, *addr, *count),
        Request::ReadDiscreteInputs(addr, count) => build_read(0x02, *addr, *count),
        Request::ReadHoldingRegisters(addr, count) => build_read(0x03, *addr, *count),
        Request::ReadInputRegisters(addr, count) => build_read(0x04, *addr, *count),
        Request::WriteSingleCoil(addr, value) => {
            let word = if *value { 0xFF00 } else { 0x0000 };
            build_write_single(0x05, *addr, word)
        }
        Request::WriteSingleRegister(addr, value) => build_write_single(0x06, *addr, *value),
        Request::ReadExceptionStatus => vec![0x07],
        Request::Diagnostics(sub_function, data) => {
            let mut out = Vec::with_capacity(5);
            out.push(0x08);
            out.extend_from_slice(&sub_function.to_be_bytes());
            out.extend_from_slice(data);
            out
        }
        Request::GetCommEventCounter => vec![0x0B],
        Request::GetCommEventLog => vec![0x0C],
        Request::WriteMultipleCoils(addr, coils) => {
            let packed = pack_coils(coils);
            let mut out = Vec::with_capacity(6 + packed.len());
            out.push(0x0F);
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(&(coils.len() as u16).to_be_bytes());
            out.push(packed.len() as u8);
            out.extend_from_slice(&packed);
            out
        }
        Request::WriteMultipleRegisters(addr, words) => {
            let mut out = Vec::with_capacity(6 + words.len() * 2);
            out.push(0x10);
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(&(words.len() as u16).to_be_bytes());
            out.push((words.len() * 2) as u8);
            for word in words {
                out.extend_from_slice(&word.to_be_bytes());
            }
            out
        }
        Request::ReportServerId => vec![0x11],
        Request::ReadFileRecord(records) => file_record::build_read(records),
        Request::WriteFileRecord(records) => file_record::build_write(records),
        Request::MaskWriteRegister(addr, and_mask, or_mask) => {
            let mut out = Vec::with_capacity(7);
            out.push(0x16);
            out.extend_from_slice(&addr.to_be_bytes());
            out.extend_from_slice(&and_mask.to_be_bytes());
            out.extend_from_slice(&or_mask.to_be_bytes());
            out
        }
        Request::ReadWriteMultipleRegisters(read_addr, read_count, write_addr, write_words) => {
            let mut out = Vec::with_capacity(10 + write_words.len() * 2);
            out.push(0x17);
            out.extend_from_slice(&read_addr.to_be_bytes());
            out.extend_from_slice(&read_count.to_be_bytes());
            out.extend_from_slice(&write_addr.to_be_bytes());
            out.extend_from_slice(&(write_words.len() as u16).to_be_bytes());
            out.push((write_words.len() * 2) as u8);
            for word in write_words {
                out.extend_from_slice(&word.to_be_bytes());
            }
            out
        }
        Request::ReadFifoQueue(addr) => {
            let mut out = Vec::with_capacity(3);
            out.push(0x18);
            out.extend_from_slice(&addr.to_be_bytes());
            out
        }
        Request::ReadDeviceIdentification(read_code, object_id) => {
            device_id::build(*read_code, *object_id)
        }
        Request::Custom(fc, data) => {
            let mut out = Vec::with_capacity(1 + data.len());
            out.push(*fc);
            out.extend_from_slice(data);
            out
        }
    }
}

fn build_read(fc: FunctionCode, addr: Address, count: Quantity) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(fc);
    out.extend_from_slice(&addr.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out
}

fn build_write_single(fc: FunctionCode, addr: Address, value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(fc);
    out.extend_from_slice(&addr.to_be_bytes());
    out.extend_from_slice(&value.to_be_bytes());
    out
}

/// Packs coils LSB-first within each byte; the final byte is zero-padded in
/// the high bits.
#[must_use]
pub fn pack_coils(coils: &[bool]) -> Vec<u8> {
    let byte_count = coils.len().div_ceil(8);
    let mut out = vec![0u8; byte_count];
    for (i, &coil) in coils.iter().enumerate() {
        if coil {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// Unpacks exactly `count` bits from `data`, LSB-first within each byte.
/// Tail padding bits beyond `count` in the final byte are discarded.
#[must_use]
pub fn unpack_coils(data: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| data[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

/// Parses a response PDU for `requested`, validating it against the
/// function code and shape `requested` implies.
pub fn parse_response(requested: &Request, pdu: &[u8]) -> Result<Response, PduError> {
    if pdu.len() < 2 {
        return Err(PduError::PduTooShort {
            expected: 2,
            got: pdu.len(),
        });
    }

    let expected_fc = function_code_of(requested);

    if pdu[0] & 0x80 != 0 {
        let raised_fc = pdu[0] & 0x7F;
        let code = pdu[1];
        return match Exception::from_known_code(code) {
            Some(exception) => Err(PduError::Exception(ExceptionResponse {
                function: raised_fc,
                exception,
            })),
            None => Err(PduError::UnknownException(code, raised_fc)),
        };
    }

    if pdu[0] != expected_fc {
        return Err(PduError::UnexpectedFunctionCode {
            expected: expected_fc,
            got: pdu[0],
        });
    }

    match requested {
        Request::ReadCoils(_, count) => {
            parse_bits(pdu, *count as usize).map(Response::ReadCoils)
        }
        Request::ReadDiscreteInputs(_, count) => {
            parse_bits(pdu, *count as usize).map(Response::ReadDiscreteInputs)
        }
        Request::ReadHoldingRegisters(_, count) => {
            parse_registers(pdu, *count as usize).map(Response::ReadHoldingRegisters)
        }
        Request::ReadInputRegisters(_, count) => {
            parse_registers(pdu, *count as usize).map(Response::ReadInputRegisters)
        }
        Request::WriteSingleCoil(..) => {
            let addr = require_u16(pdu, 1)?;
            Ok(Response::WriteSingleCoil(addr))
        }
        Request::WriteSingleRegister(..) => {
            let addr = require_u16(pdu, 1)?;
            let value = require_u16(pdu, 3)?;
            Ok(Response::WriteSingleRegister(addr, value))
        }
        Request::ReadExceptionStatus => {
            let status = require_u8(pdu, 1)?;
            Ok(Response::ReadExceptionStatus(status))
        }
        Request::Diagnostics(..) => {
            let sub_function = require_u16(pdu, 1)?;
            if pdu.len() < 5 {
                return Err(PduError::PduTooShort {
                    expected: 5,
                    got: pdu.len(),
                });
            }
            Ok(Response::Diagnostics(sub_function, [pdu[3], pdu[4]]))
        }
        Request::GetCommEventCounter => {
            let status = require_u16(pdu, 1)?;
            let count = require_u16(pdu, 3)?;
            Ok(Response::GetCommEventCounter(status, count))
        }
        Request::GetCommEventLog => parse_comm_event_log(pdu).map(Response::GetCommEventLog),
        Request::WriteMultipleCoils(..) => {
            let addr = require_u16(pdu, 1)?;
            let qty = require_u16(pdu, 3)?;
            Ok(Response::WriteMultipleCoils(addr, qty))
        }
        Request::WriteMultipleRegisters(..) => {
            let addr = require_u16(pdu, 1)?;
            let qty = require_u16(pdu, 3)?;
            Ok(Response::WriteMultipleRegisters(addr, qty))
        }
        Request::ReportServerId => parse_server_id(pdu).map(Response::ReportServerId),
        Request::ReadFileRecord(_) => {
            file_record::parse_read_response(pdu).map(Response::ReadFileRecord)
        }
        Request::WriteFileRecord(_) => {
            file_record::parse_write_echo(pdu).map(Response::WriteFileRecord)
        }
        Request::MaskWriteRegister(..) => {
            let addr = require_u16(pdu, 1)?;
            let and_mask = require_u16(pdu, 3)?;
            let or_mask = require_u16(pdu, 5)?;
            Ok(Response::MaskWriteRegister(addr, and_mask, or_mask))
        }
        Request::ReadWriteMultipleRegisters(..) => {
            let byte_count = require_u8(pdu, 1)? as usize;
            if byte_count % 2 != 0 {
                return Err(PduError::ByteCountMismatch {
                    expected: byte_count & !1,
                    got: byte_count,
                });
            }
            let registers = parse_register_list(pdu, 2, byte_count / 2)?;
            Ok(Response::ReadWriteMultipleRegisters(registers))
        }
        Request::ReadFifoQueue(..) => {
            let byte_count = require_u16(pdu, 1)? as usize;
            let fifo_count = require_u16(pdu, 3)? as usize;
            if byte_count != 2 + fifo_count * 2 {
                return Err(PduError::ByteCountMismatch {
                    expected: 2 + fifo_count * 2,
                    got: byte_count,
                });
            }
            let registers = parse_register_list(pdu, 5, fifo_count)?;
            Ok(Response::ReadFifoQueue(registers))
        }
        Request::ReadDeviceIdentification(..) => {
            device_id::parse(pdu).map(Response::ReadDeviceIdentification)
        }
        Request::Custom(fc, _) => Ok(Response::Custom(*fc, pdu[1..].to_vec())),
    }
}

fn require_u8(pdu: &[u8], offset: usize) -> Result<u8, PduError> {
    crate::bytes::read_u8(pdu, offset).ok_or(PduError::PduTooShort {
        expected: offset + 1,
        got: pdu.len(),
    })
}

fn require_u16(pdu: &[u8], offset: usize) -> Result<u16, PduError> {
    crate::bytes::read_u16(pdu, offset).ok_or(PduError::PduTooShort {
        expected: offset + 2,
        got: pdu.len(),
    })
}

fn parse_bits(pdu: &[u8], requested_count: usize) -> Result<Vec<Coil>, PduError> {
    let byte_count = require_u8(pdu, 1)? as usize;
    let expected = requested_count.div_ceil(8);
    if byte_count != expected {
        return Err(PduError::ByteCountMismatch {
            expected,
            got: byte_count,
        });
    }
    let data = pdu.get(2..2 + byte_count).ok_or(PduError::PduTooShort {
        expected: 2 + byte_count,
        got: pdu.len(),
    })?;
    Ok(unpack_coils(data, requested_count))
}

fn parse_registers(pdu: &[u8], requested_count: usize) -> Result<Vec<Word>, PduError> {
    let byte_count = require_u8(pdu, 1)? as usize;
    let expected = requested_count * 2;
    if byte_count != expected {
        return Err(PduError::ByteCountMismatch {
            expected,
            got: byte_count,
        });
    }
    parse_register_list(pdu, 2, requested_count)
}

fn parse_register_list(pdu: &[u8], offset: usize, count: usize) -> Result<Vec<Word>, PduError> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        out.push(require_u16(pdu, offset + i * 2)?);
    }
    Ok(out)
}

fn parse_comm_event_log(pdu: &[u8]) -> Result<CommEventLog, PduError> {
    let byte_count = require_u8(pdu, 1)? as usize;
    if byte_count < 6 {
        return Err(PduError::ByteCountMismatch {
            expected: 6,
            got: byte_count,
        });
    }
    let status = require_u16(pdu, 2)?;
    let event_count = require_u16(pdu, 4)?;
    let message_count = require_u16(pdu, 6)?;
    let events_len = byte_count - 6;
    let events = pdu
        .get(8..8 + events_len)
        .ok_or(PduError::PduTooShort {
            expected: 8 + events_len,
            got: pdu.len(),
        })?
        .to_vec();
    Ok(CommEventLog {
        status,
        event_count,
        message_count,
        events,
    })
}

fn parse_server_id(pdu: &[u8]) -> Result<ServerId, PduError> {
    let byte_count = require_u8(pdu, 1)? as usize;
    if byte_count == 0 {
        return Err(PduError::ByteCountMismatch {
            expected: 1,
            got: 0,
        });
    }
    let id_len = byte_count - 1;
    let server_id = pdu
        .get(2..2 + id_len)
        .ok_or(PduError::PduTooShort {
            expected: 2 + id_len,
            got: pdu.len(),
        })?
        .to_vec();
    let run_indicator = require_u8(pdu, 2 + id_len)?;
    Ok(ServerId {
        server_id,
        run_indicator_on: run_indicator == 0xFF,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    mod bits {
        use super::*;

        #[test]
        fn pack_pads_final_byte_with_zero_high_bits() {
            let coils = vec![true, false, true, true, false, false, false, false, true];
            let packed = pack_coils(&coils);
            assert_eq!(packed, vec![0b0000_1101, 0b0000_0001]);
        }

        #[test]
        fn unpack_discards_tail_padding() {
            let packed = [0b0000_1101];
            assert_eq!(
                unpack_coils(&packed, 5),
                vec![true, false, true, true, false]
            );
        }
    }

    mod build_requests {
        use super::*;

        #[test]
        fn read_holding_registers() {
            let pdu = build_request(&Request::ReadHoldingRegisters(0, 10));
            assert_eq!(pdu, vec![0x03, 0x00, 0x00, 0x00, 0x0A]);
        }

        #[test]
        fn write_single_coil_on() {
            let pdu = build_request(&Request::WriteSingleCoil(0x10, true));
            assert_eq!(pdu, vec![0x05, 0x00, 0x10, 0xFF, 0x00]);
        }

        #[test]
        fn write_single_coil_off() {
            let pdu = build_request(&Request::WriteSingleCoil(0x10, false));
            assert_eq!(pdu, vec![0x05, 0x00, 0x10, 0x00, 0x00]);
        }

        #[test]
        fn write_multiple_coils() {
            let pdu = build_request(&Request::WriteMultipleCoils(
                0x00,
                vec![true, false, true, true, false, false, false, false, true],
            ));
            assert_eq!(
                pdu,
                vec![0x0F, 0x00, 0x00, 0x00, 0x09, 0x02, 0b0000_1101, 0b0000_0001]
            );
        }

        #[test]
        fn is_idempotent() {
            let req = Request::ReadWriteMultipleRegisters(0, 5, 10, vec![1, 2, 3]);
            assert_eq!(build_request(&req), build_request(&req));
        }

        #[test]
        fn custom_function_code() {
            let pdu = build_request(&Request::Custom(0x41, vec![0xDE, 0xAD]));
            assert_eq!(pdu, vec![0x41, 0xDE, 0xAD]);
        }
    }

    mod parse_responses {
        use super::*;

        #[test]
        fn read_holding_registers_round_trips() {
            let request = Request::ReadHoldingRegisters(0, 10);
            let pdu = [
                0x03, 0x14, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x05, 0x00,
                0x06, 0x00, 0x07, 0x00, 0x08, 0x00, 0x09, 0x00, 0x0A,
            ];
            let response = parse_response(&request, &pdu).unwrap();
            assert_eq!(
                response,
                Response::ReadHoldingRegisters(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
            );
        }

        #[test]
        fn exception_passthrough() {
            let request = Request::ReadHoldingRegisters(0, 10);
            let pdu = [0x83, 0x02];
            let err = parse_response(&request, &pdu).unwrap_err();
            assert_eq!(
                err,
                PduError::Exception(ExceptionResponse {
                    function: 0x03,
                    exception: Exception::IllegalDataAddress,
                })
            );
        }

        #[test]
        fn unknown_exception_code_is_distinguished() {
            let request = Request::ReadHoldingRegisters(0, 10);
            let pdu = [0x83, 0x42];
            let err = parse_response(&request, &pdu).unwrap_err();
            assert_eq!(err, PduError::UnknownException(0x42, 0x03));
        }

        #[test]
        fn unexpected_function_code() {
            let request = Request::ReadHoldingRegisters(0, 10);
            let pdu = [0x04, 0x02, 0x00, 0x00];
            let err = parse_response(&request, &pdu).unwrap_err();
            assert_eq!(
                err,
                PduError::UnexpectedFunctionCode {
                    expected: 0x03,
                    got: 0x04
                }
            );
        }

        #[test]
        fn byte_count_mismatch() {
            let request = Request::ReadHoldingRegisters(0, 10);
            let pdu = [0x03, 0x02, 0x00, 0x01];
            let err = parse_response(&request, &pdu).unwrap_err();
            assert_eq!(
                err,
                PduError::ByteCountMismatch {
                    expected: 20,
                    got: 2
                }
            );
        }

        #[test]
        fn pdu_too_short_never_panics() {
            let request = Request::ReadHoldingRegisters(0, 10);
            for len in 0..5 {
                let pdu = vec![0x03; len];
                assert!(parse_response(&request, &pdu).is_err());
            }
        }

        #[test]
        fn read_fifo_queue() {
            let request = Request::ReadFifoQueue(0x04);
            let pdu = [0x18, 0x00, 0x06, 0x00, 0x02, 0x01, 0x11, 0x02, 0x22];
            let response = parse_response(&request, &pdu).unwrap();
            assert_eq!(response, Response::ReadFifoQueue(vec![0x0111, 0x0222]));
        }

        #[test]
        fn mask_write_register_echo() {
            let request = Request::MaskWriteRegister(0x04, 0x00F2, 0x0025);
            let pdu = [0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25];
            let response = parse_response(&request, &pdu).unwrap();
            assert_eq!(response, Response::MaskWriteRegister(0x04, 0x00F2, 0x0025));
        }

        #[test]
        fn report_server_id() {
            let request = Request::ReportServerId;
            let pdu = [0x11, 0x03, b'A', b'B', 0xFF];
            let response = parse_response(&request, &pdu).unwrap();
            assert_eq!(
                response,
                Response::ReportServerId(ServerId {
                    server_id: vec![b'A', b'B'],
                    run_indicator_on: true,
                })
            );
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn rejects_over_max_bit_count() {
            assert!(validate_request(&Request::ReadCoils(0, 2001)).is_err());
            assert!(validate_request(&Request::ReadCoils(0, 2000)).is_ok());
        }

        #[test]
        fn rejects_zero_count() {
            assert!(validate_request(&Request::ReadHoldingRegisters(0, 0)).is_err());
        }

        #[test]
        fn rejects_over_max_register_count() {
            assert!(validate_request(&Request::ReadHoldingRegisters(0, 126)).is_err());
        }

        #[test]
        fn read_write_multiple_checks_both_bounds() {
            assert!(validate_request(&Request::ReadWriteMultipleRegisters(
                0, 125, 0, vec![0; 121]
            ))
            .is_ok());
            assert!(validate_request(&Request::ReadWriteMultipleRegisters(
                0, 126, 0, vec![0; 121]
            ))
            .is_err());
            assert!(validate_request(&Request::ReadWriteMultipleRegisters(
                0, 125, 0, vec![0; 122]
            ))
            .is_err());
        }
    }
}
