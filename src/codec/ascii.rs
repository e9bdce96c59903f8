// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII serial framing: `:` + hex(unit id + PDU + LRC) + CR LF.
//!
//! Every byte on the wire is a printable hex digit, so a frame is always an
//! even number of characters between the leading colon and the trailing
//! `\r\n`. The longest frame the format can carry (2 header hex chars + 2 *
//! 252 PDU bytes + 2 LRC hex chars + 3 delimiter bytes) is well under the
//! 513-character ceiling enforced below.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::Error;
use crate::checksum;

/// `:` + at least a unit id byte, one PDU byte and the LRC byte, hex-encoded,
/// + CR LF.
const MIN_FRAME_LEN: usize = 1 + 2 * 3 + 2;

/// Generous upper bound on a frame's character length, guarding against an
/// unterminated stream growing the receive buffer without bound.
const MAX_FRAME_LEN: usize = 513;

/// A full ASCII application data unit: unit id plus PDU, with the leading
/// colon, LRC and trailing CR LF stripped (decode) or yet to be added
/// (encode).
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

/// ASCII codec for use with [`tokio_util::codec::Framed`] over a serial port.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = Adu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, Error> {
        let Some(start) = buf.iter().position(|&b| b == b':') else {
            // No frame start in the buffer at all; nothing usable can ever
            // come from the bytes seen so far.
            buf.clear();
            return Ok(None);
        };
        if start > 0 {
            buf.advance(start);
        }

        let Some(terminator) = buf
            .windows(2)
            .position(|window| window == b"\r\n")
        else {
            if buf.len() > MAX_FRAME_LEN {
                return Err(Error::FrameDecodingFailed(
                    "ASCII frame exceeds the maximum length without a CR LF terminator".into(),
                ));
            }
            return Ok(None);
        };

        let frame_len = terminator + 2;
        if frame_len < MIN_FRAME_LEN {
            // Too short to be a real frame; drop the stray colon and let the
            // next call look for the next one.
            buf.advance(1);
            return Err(Error::FrameTooShort);
        }

        let frame = buf.split_to(frame_len);
        let hex = std::str::from_utf8(&frame[1..frame.len() - 2])
            .map_err(|_| Error::InvalidHexCharacter(char::REPLACEMENT_CHARACTER))?;
        let raw = crate::bytes::hex_decode(hex)
            .map_err(|crate::bytes::InvalidHexCharacter(c)| Error::InvalidHexCharacter(c))?;
        if raw.len() < 2 {
            return Err(Error::FrameTooShort);
        }
        let (body, lrc_byte) = raw.split_at(raw.len() - 1);
        if !checksum::verify_lrc(body, lrc_byte[0]) {
            return Err(Error::LrcError);
        }
        Ok(Some(Adu {
            slave_id: body[0],
            pdu: body[1..].to_vec(),
        }))
    }
}

impl Encoder<Adu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: Adu, dst: &mut BytesMut) -> Result<(), Error> {
        let mut body = Vec::with_capacity(1 + adu.pdu.len() + 1);
        body.push(adu.slave_id);
        body.extend_from_slice(&adu.pdu);
        body.push(checksum::lrc(&body));
        let hex = crate::bytes::hex_encode(&body);
        if 1 + hex.len() + 2 > MAX_FRAME_LEN {
            return Err(Error::FrameEncodingFailed(format!(
                "encoded frame of {} characters exceeds the {MAX_FRAME_LEN}-character limit",
                hex.len()
            )));
        }
        dst.reserve(1 + hex.len() + 2);
        dst.put_u8(b':');
        dst.extend_from_slice(hex.as_bytes());
        dst.put_u8(b'\r');
        dst.put_u8(b'\n');
        Ok(())
    }
}
