// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Frame helpers shared by the integration tests. Each test plays the
//! server side by hand instead of depending on a server implementation,
//! since this crate is client-only.

#![allow(dead_code)]

use modbus_client::{bytes::hex_encode, checksum};

/// Encodes one MBAP frame: transaction id, unit id and PDU.
pub fn mbap_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + pdu.len());
    out.extend_from_slice(&transaction_id.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // protocol id
    out.extend_from_slice(&(1 + pdu.len() as u16).to_be_bytes());
    out.push(unit_id);
    out.extend_from_slice(pdu);
    out
}

/// Reads and decodes exactly one MBAP frame from a `TcpStream`'s read half,
/// returning `(transaction_id, unit_id, pdu)`.
pub async fn read_mbap_request(
    stream: &mut (impl tokio::io::AsyncRead + Unpin),
) -> (u16, u8, Vec<u8>) {
    use tokio::io::AsyncReadExt;
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await.unwrap();
    let transaction_id = u16::from_be_bytes([header[0], header[1]]);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let unit_id = header[6];
    let mut pdu = vec![0u8; length - 1];
    stream.read_exact(&mut pdu).await.unwrap();
    (transaction_id, unit_id, pdu)
}

/// Encodes one RTU frame: slave id, PDU and its little-endian CRC-16.
pub fn rtu_frame(slave_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut body = vec![slave_id];
    body.extend_from_slice(pdu);
    let crc = checksum::crc16(&body);
    body.extend_from_slice(&crc.to_le_bytes());
    body
}

/// Holding-register read response PDU: FC 0x03, byte count, big-endian words.
pub fn read_holding_registers_response_pdu(words: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + words.len() * 2);
    out.push(0x03);
    out.push((words.len() * 2) as u8);
    for word in words {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out
}

/// Write-single-coil response PDU: FC 0x05, the request echoed verbatim.
pub fn write_single_coil_response_pdu(addr: u16, value: bool) -> Vec<u8> {
    let mut out = vec![0x05];
    out.extend_from_slice(&addr.to_be_bytes());
    out.extend_from_slice(if value { &[0xFF, 0x00] } else { &[0x00, 0x00] });
    out
}

/// Encodes one ASCII frame: `:` + hex(slave id + PDU + LRC) + CR LF.
pub fn ascii_frame(slave_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut body = vec![slave_id];
    body.extend_from_slice(pdu);
    body.push(checksum::lrc(&body));
    let mut out = Vec::with_capacity(1 + body.len() * 2 + 2);
    out.push(b':');
    out.extend_from_slice(hex_encode(&body).as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// Exception response PDU: the request's function code with bit 7 set, plus
/// the exception code.
pub fn exception_response_pdu(function: u8, exception_code: u8) -> Vec<u8> {
    vec![function | 0x80, exception_code]
}
