// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FC 0x14 (Read File Record) and FC 0x15 (Write File Record).

use super::PduError;

/// Reference type for file record sub-requests; the only value the Modbus
/// specification defines.
pub const REFERENCE_TYPE: u8 = 0x06;

/// One sub-request of a Read File Record request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFileRecordRequest {
    pub file_number: u16,
    pub record_number: u16,
    pub record_length: u16,
}

/// One decoded sub-response of a Read File Record response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordData {
    pub registers: Vec<u16>,
}

/// One sub-request of a Write File Record request (and its echo response).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordWrite {
    pub file_number: u16,
    pub record_number: u16,
    pub data: Vec<u16>,
}

pub(super) fn build_read(requests: &[ReadFileRecordRequest]) -> Vec<u8> {
    let byte_count = requests.len() * 7;
    let mut out = Vec::with_capacity(2 + byte_count);
    out.push(0x14);
    out.push(byte_count as u8);
    for req in requests {
        out.push(REFERENCE_TYPE);
        out.extend_from_slice(&req.file_number.to_be_bytes());
        out.extend_from_slice(&req.record_number.to_be_bytes());
        out.extend_from_slice(&req.record_length.to_be_bytes());
    }
    out
}

pub(super) fn parse_read_response(pdu: &[u8]) -> Result<Vec<FileRecordData>, PduError> {
    if pdu.len() < 2 {
        return Err(PduError::PduTooShort {
            expected: 2,
            got: pdu.len(),
        });
    }
    let data_len = pdu[1] as usize;
    let body = &pdu[2..];
    if body.len() < data_len {
        return Err(PduError::PduTooShort {
            expected: 2 + data_len,
            got: pdu.len(),
        });
    }

    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut consumed = 0usize;
    while consumed < data_len {
        if offset + 2 > body.len() {
            return Err(PduError::PduTooShort {
                expected: offset + 2,
                got: body.len(),
            });
        }
        let resp_len = body[offset] as usize;
        let ref_type = body[offset + 1];
        if ref_type != REFERENCE_TYPE {
            return Err(PduError::InvalidFileReferenceType(ref_type));
        }
        let data_bytes = resp_len.saturating_sub(1);
        if data_bytes % 2 != 0 {
            return Err(PduError::OddRecordDataLength(data_bytes));
        }
        let data_start = offset + 2;
        let data_end = data_start + data_bytes;
        if data_end > body.len() {
            return Err(PduError::PduTooShort {
                expected: data_end,
                got: body.len(),
            });
        }
        let registers = body[data_start..data_end]
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect();
        records.push(FileRecordData { registers });
        offset = data_end;
        consumed += 1 + resp_len;
    }
    if consumed != data_len {
        return Err(PduError::ByteCountMismatch {
            expected: data_len,
            got: consumed,
        });
    }
    Ok(records)
}

pub(super) fn build_write(requests: &[FileRecordWrite]) -> Vec<u8> {
    let data_len: usize = requests.iter().map(|r| 7 + r.data.len() * 2).sum();
    let mut out = Vec::with_capacity(2 + data_len);
    out.push(0x15);
    out.push(data_len as u8);
    for req in requests {
        out.push(REFERENCE_TYPE);
        out.extend_from_slice(&req.file_number.to_be_bytes());
        out.extend_from_slice(&req.record_number.to_be_bytes());
        out.extend_from_slice(&(req.data.len() as u16).to_be_bytes());
        for word in &req.data {
            out.extend_from_slice(&word.to_be_bytes());
        }
    }
    out
}

/// Write File Record responses echo the request verbatim, so parsing reuses
/// the request decoder.
pub(super) fn parse_write_echo(pdu: &[u8]) -> Result<Vec<FileRecordWrite>, PduError> {
    if pdu.len() < 2 {
        return Err(PduError::PduTooShort {
            expected: 2,
            got: pdu.len(),
        });
    }
    let data_len = pdu[1] as usize;
    let body = &pdu[2..];
    if body.len() < data_len {
        return Err(PduError::PduTooShort {
            expected: 2 + data_len,
            got: pdu.len(),
        });
    }
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < data_len {
        if offset + 7 > body.len() {
            return Err(PduError::PduTooShort {
                expected: offset + 7,
                got: body.len(),
            });
        }
        let ref_type = body[offset];
        if ref_type != REFERENCE_TYPE {
            return Err(PduError::InvalidFileReferenceType(ref_type));
        }
        let file_number = u16::from_be_bytes([body[offset + 1], body[offset + 2]]);
        let record_number = u16::from_be_bytes([body[offset + 3], body[offset + 4]]);
        let record_length = u16::from_be_bytes([body[offset + 5], body[offset + 6]]) as usize;
        let data_start = offset + 7;
        let data_end = data_start + record_length * 2;
        if data_end > body.len() {
            return Err(PduError::PduTooShort {
                expected: data_end,
                got: body.len(),
            });
        }
        let data = body[data_start..data_end]
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect();
        records.push(FileRecordWrite {
            file_number,
            record_number,
            data,
        });
        offset = data_end;
    }
    Ok(records)
}
