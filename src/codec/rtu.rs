// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU serial framing: CRC-16 trailer, no delimiters, frame boundaries
//! inferred from the response's own function code.
//!
//! A client always knows the length of the request it just sent, so only
//! response decoding needs a length table; encoding only ever appends a
//! trailing CRC to an already-built PDU.

use bytes::{Buf, BytesMut};
use smallvec::SmallVec;
use tokio_util::codec::{Decoder, Encoder};

use super::Error;
use crate::checksum;

/// Largest RTU frame (slave id + PDU + CRC) a compliant device may send.
pub const MAX_FRAME_LEN: usize = 256;

/// Resync attempts per `decode` call before giving up and surfacing an
/// error. Each attempt drops exactly one byte, so this bounds how much
/// garbage a single `decode` call will eat before yielding control back to
/// the caller.
const MAX_RESYNC_ATTEMPTS: usize = MAX_FRAME_LEN;

/// A full RTU application data unit: slave (unit) id plus PDU, with the CRC
/// stripped (decode) or yet to be appended (encode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adu {
    pub slave_id: u8,
    pub pdu: Vec<u8>,
}

impl super::SerialAdu for Adu {
    fn new(slave_id: u8, pdu: Vec<u8>) -> Self {
        Self { slave_id, pdu }
    }

    fn slave_id(&self) -> u8 {
        self.slave_id
    }

    fn pdu(&self) -> &[u8] {
        &self.pdu
    }
}

/// Determines how many bytes of PDU (starting at and including the function
/// code) a response frame occupies, given the bytes buffered so far
/// (`adu_buf[0]` is the slave id, `adu_buf[1]` the function code, …).
///
/// Returns `Ok(None)` when not enough bytes are buffered yet to know the
/// answer (the caller should wait for more data), not when the frame is
/// invalid.
fn response_pdu_len(adu_buf: &[u8]) -> Result<Option<usize>, Error> {
    if adu_buf.len() < 2 {
        return Ok(None);
    }
    let fc = adu_buf[1];
    let len = match fc {
        0x01..=0x04 | 0x0C | 0x11 | 0x14 | 0x15 | 0x17 => {
            let Some(&byte_count) = adu_buf.get(2) else {
                return Ok(None);
            };
            2 + byte_count as usize
        }
        0x05 | 0x06 | 0x0B | 0x0F | 0x10 => 5,
        0x07 => 2,
        0x08 => 5,
        0x16 => 7,
        0x18 => {
            if adu_buf.len() < 4 {
                return Ok(None);
            }
            let byte_count = u16::from_be_bytes([adu_buf[2], adu_buf[3]]) as usize;
            3 + byte_count
        }
        0x2B => return device_identification_pdu_len(adu_buf),
        fc if fc & 0x80 != 0 => 2,
        other => {
            return Err(Error::FrameDecodingFailed(format!(
                "unsupported RTU function code {other:#04X}"
            )))
        }
    };
    Ok(Some(len))
}

/// Read Device Identification (FC 0x2B/MEI 0x0E) responses carry a variable
/// number of variable-length objects, so the frame length can only be known
/// once every object has actually been buffered.
fn device_identification_pdu_len(adu_buf: &[u8]) -> Result<Option<usize>, Error> {
    // slave(1) fc(1) mei(1) readCode(1) conformity(1) moreFollows(1) nextId(1) numObjects(1)
    if adu_buf.len() < 8 {
        return Ok(None);
    }
    let num_objects = adu_buf[7] as usize;
    let mut offset = 8usize;
    for _ in 0..num_objects {
        if offset + 2 > adu_buf.len() {
            return Ok(None);
        }
        let object_len = adu_buf[offset + 1] as usize;
        offset += 2 + object_len;
        if offset > adu_buf.len() {
            return Ok(None);
        }
    }
    Ok(Some(offset - 1))
}

#[derive(Debug, Default)]
struct FrameScanner {
    /// Bytes dropped while resynchronising, retained only to size a single
    /// log line; cleared as soon as a valid frame is found.
    dropped: SmallVec<[u8; MAX_FRAME_LEN]>,
}

impl FrameScanner {
    fn try_decode_one(&self, buf: &BytesMut) -> Result<Option<(usize, Adu)>, Error> {
        let Some(pdu_len) = response_pdu_len(buf)? else {
            return Ok(None);
        };
        let adu_len = 1 + pdu_len;
        let total = adu_len + 2;
        if buf.len() < total {
            return Ok(None);
        }
        let computed = checksum::crc16(&buf[..adu_len]);
        let expected = u16::from_le_bytes([buf[adu_len], buf[adu_len + 1]]);
        if computed != expected {
            return Err(Error::InvalidCrc);
        }
        Ok(Some((
            total,
            Adu {
                slave_id: buf[0],
                pdu: buf[1..adu_len].to_vec(),
            },
        )))
    }

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, Error> {
        for _ in 0..MAX_RESYNC_ATTEMPTS {
            match self.try_decode_one(buf) {
                Ok(Some((consumed, adu))) => {
                    buf.advance(consumed);
                    if !self.dropped.is_empty() {
                        log::debug!(
                            "RTU resync recovered after dropping {} byte(s)",
                            self.dropped.len()
                        );
                        self.dropped.clear();
                    }
                    return Ok(Some(adu));
                }
                Ok(None) => return Ok(None),
                Err(Error::InvalidCrc) => {
                    if self.dropped.len() < MAX_FRAME_LEN {
                        self.dropped.push(buf[0]);
                    }
                    buf.advance(1);
                }
                Err(other) => return Err(other),
            }
        }
        Err(Error::FrameDecodingFailed(
            "gave up resynchronising after exhausting the RTU resync budget".into(),
        ))
    }
}

/// RTU codec for use with [`tokio_util::codec::Framed`] over a serial port.
#[derive(Debug, Default)]
pub struct ClientCodec {
    scanner: FrameScanner,
}

impl Decoder for ClientCodec {
    type Item = Adu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, Error> {
        self.scanner.decode(buf)
    }
}

impl Encoder<Adu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: Adu, dst: &mut BytesMut) -> Result<(), Error> {
        if 1 + adu.pdu.len() + 2 > MAX_FRAME_LEN {
            return Err(Error::FrameEncodingFailed(format!(
                "PDU of {} bytes would exceed the {MAX_FRAME_LEN}-byte RTU frame limit",
                adu.pdu.len()
            )));
        }
        let mut frame = Vec::with_capacity(1 + adu.pdu.len());
        frame.push(adu.slave_id);
        frame.extend_from_slice(&adu.pdu);
        let crc = checksum::crc16(&frame);
        dst.reserve(frame.len() + 2);
        dst.extend_from_slice(&frame);
        dst.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }
}
