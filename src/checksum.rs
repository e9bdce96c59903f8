// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Checksum engines used by the serial transports.
//!
//! [`crc16`] is used by RTU framing, [`lrc`] by ASCII framing. Both operate
//! on byte spans with no allocation beyond what the caller already owns.

/// Computes the Modbus CRC-16 (polynomial `0xA001` reflected, initial value
/// `0xFFFF`, LSB-first byte processing) over `data`.
///
/// The returned value is the CRC register in its natural form; callers
/// transmit it little-endian (low byte first), per the Modbus RTU wire
/// format.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Appends the little-endian CRC-16 of `data` to a copy of `data`.
#[must_use]
pub fn append_crc(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc16(data).to_le_bytes());
    out
}

/// Verifies that the last two bytes of `framed` are the little-endian CRC-16
/// of the preceding bytes. Returns `false` if `framed` is shorter than two
/// bytes.
#[must_use]
pub fn verify_crc(framed: &[u8]) -> bool {
    let Some(split) = framed.len().checked_sub(2) else {
        return false;
    };
    let (data, crc_bytes) = framed.split_at(split);
    let expected = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    crc16(data) == expected
}

/// Computes the Longitudinal Redundancy Check: the two's complement of the
/// 8-bit sum (modulo 256) of all bytes in `data`.
#[must_use]
pub fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)).wrapping_neg()
}

/// Verifies that `expected` is the LRC of `data`.
#[must_use]
pub fn verify_lrc(data: &[u8], expected: u8) -> bool {
    lrc(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_spec_example() {
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let framed = append_crc(&data);
        assert_eq!(framed, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]);
        assert!(verify_crc(&framed));
    }

    #[test]
    fn crc_detects_single_bit_flip() {
        let data = [0x01, 0x03, 0x08, 0x2B, 0x00, 0x02];
        let mut framed = append_crc(&data);
        *framed.last_mut().unwrap() ^= 0x01;
        assert!(!verify_crc(&framed));
    }

    #[test]
    fn crc_of_empty_slice_is_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn crc_too_short_to_verify() {
        assert!(!verify_crc(&[0x01]));
        assert!(!verify_crc(&[]));
    }

    #[test]
    fn lrc_of_known_frame() {
        // ":0103000A" address+PDU bytes 01 03 00 0A -> LRC = -(0x01+0x03+0x00+0x0A) mod 256
        let data = [0x01, 0x03, 0x00, 0x0A];
        let checksum = lrc(&data);
        assert_eq!(checksum, 0xF2);
        assert!(verify_lrc(&data, checksum));
    }

    #[test]
    fn lrc_rejects_tampered_data() {
        let data = [0x01, 0x03, 0x00, 0x0A];
        let checksum = lrc(&data);
        assert!(!verify_lrc(&[0x01, 0x03, 0x00, 0x0B], checksum));
    }
}
