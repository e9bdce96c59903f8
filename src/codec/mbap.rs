// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing, shared by the TCP, TLS and UDP transports.
//!
//! The streaming [`ClientCodec`] accumulates bytes from a
//! [`tokio_util::codec::Framed`] socket; [`encode_datagram`] and
//! [`decode_datagram`] frame a single UDP packet without any buffering state.

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::Error;

/// Transaction id (2) + protocol id (2) + length (2) + unit id (1).
pub const HEADER_LEN: usize = 7;

/// The only protocol identifier Modbus/TCP defines.
pub const PROTOCOL_ID: u16 = 0x0000;

/// Largest PDU the `Length` field can represent (`u8::MAX` minus the unit id
/// byte it also counts).
pub const MAX_PDU_LEN: usize = 253;

/// An MBAP header, without the `Length` field (implied by the PDU).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub unit_id: u8,
}

/// A full MBAP application data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adu {
    pub header: MbapHeader,
    pub pdu: Vec<u8>,
}

fn encode_into(adu: &Adu, dst: &mut impl BufMut) -> Result<(), Error> {
    if adu.pdu.len() > MAX_PDU_LEN {
        return Err(Error::FrameEncodingFailed(format!(
            "PDU of {} bytes exceeds the {MAX_PDU_LEN}-byte MBAP limit",
            adu.pdu.len()
        )));
    }
    let length = 1 + adu.pdu.len() as u16;
    dst.put_u16(adu.header.transaction_id);
    dst.put_u16(PROTOCOL_ID);
    dst.put_u16(length);
    dst.put_u8(adu.header.unit_id);
    dst.put_slice(&adu.pdu);
    Ok(())
}

/// Encodes a single ADU as a standalone UDP datagram payload.
pub fn encode_datagram(adu: &Adu) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(HEADER_LEN + adu.pdu.len());
    encode_into(adu, &mut out)?;
    Ok(out)
}

/// Decodes a whole UDP datagram as exactly one ADU. Unlike the streaming
/// decoder, trailing garbage or a short packet is always an error: there is
/// no next read to complete the frame with.
pub fn decode_datagram(datagram: &[u8]) -> Result<Adu, Error> {
    if datagram.len() < HEADER_LEN {
        return Err(Error::FrameTooShort);
    }
    let length = BigEndian::read_u16(&datagram[4..6]);
    if length == 0 || length as usize > MAX_PDU_LEN + 1 {
        return Err(Error::InvalidLength(length));
    }
    let total = HEADER_LEN + (length as usize - 1);
    if datagram.len() != total {
        return Err(Error::FrameDecodingFailed(format!(
            "datagram of {} bytes does not match declared length ({total} bytes)",
            datagram.len()
        )));
    }
    let protocol_id = BigEndian::read_u16(&datagram[2..4]);
    if protocol_id != PROTOCOL_ID {
        return Err(Error::InvalidProtocolId(protocol_id));
    }
    Ok(Adu {
        header: MbapHeader {
            transaction_id: BigEndian::read_u16(&datagram[0..2]),
            unit_id: datagram[6],
        },
        pdu: datagram[HEADER_LEN..].to_vec(),
    })
}

/// Streaming MBAP codec for TCP and TLS connections.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = Adu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, Error> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let length = BigEndian::read_u16(&buf[4..6]);
        if length == 0 || length as usize > MAX_PDU_LEN + 1 {
            return Err(Error::InvalidLength(length));
        }
        let total = HEADER_LEN + (length as usize - 1);
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }
        let protocol_id = BigEndian::read_u16(&buf[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(Error::InvalidProtocolId(protocol_id));
        }
        let transaction_id = BigEndian::read_u16(&buf[0..2]);
        let unit_id = buf[6];
        let frame = buf.split_to(total);
        Ok(Some(Adu {
            header: MbapHeader {
                transaction_id,
                unit_id,
            },
            pdu: frame[HEADER_LEN..].to_vec(),
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => {
                let remaining = buf.len();
                buf.advance(remaining);
                Err(Error::IncompleteFrameAtEof(remaining))
            }
        }
    }
}

impl Encoder<Adu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: Adu, dst: &mut BytesMut) -> Result<(), Error> {
        dst.reserve(HEADER_LEN + adu.pdu.len());
        encode_into(&adu, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adu(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Adu {
        Adu {
            header: MbapHeader {
                transaction_id,
                unit_id,
            },
            pdu: pdu.to_vec(),
        }
    }

    #[test]
    fn decode_waits_for_the_header() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_waits_for_the_rest_of_the_pdu() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(!buf.is_empty(), "decode must not consume a partial frame");
    }

    #[test]
    fn decode_a_complete_read_holding_registers_response() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, 0x07, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A,
            ][..],
        );
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, adu(0x0007, 0x01, &[0x03, 0x02, 0x00, 0x2A]));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_zero_length() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01][..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap_err(),
            Error::InvalidLength(0)
        ));
    }

    #[test]
    fn decode_rejects_foreign_protocol_id() {
        let mut codec = ClientCodec;
        let mut buf =
            BytesMut::from(&[0x00, 0x01, 0x00, 0x09, 0x00, 0x02, 0x01, 0x03][..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap_err(),
            Error::InvalidProtocolId(0x0009)
        ));
    }

    #[test]
    fn decode_eof_with_a_dangling_fragment_is_an_error() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf).unwrap_err(),
            Error::IncompleteFrameAtEof(3)
        ));
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::new();
        let original = adu(0x2A, 0x11, &[0x01, 0x00, 0x00, 0x00, 0x0A]);
        codec.encode(original.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn encode_rejects_oversized_pdu() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::new();
        let oversized = adu(1, 1, &vec![0u8; MAX_PDU_LEN + 1]);
        assert!(matches!(
            codec.encode(oversized, &mut buf).unwrap_err(),
            Error::FrameEncodingFailed(_)
        ));
    }

    #[test]
    fn datagram_round_trips() {
        let original = adu(0x55, 0x02, &[0x01, 0x00, 0x00, 0x00, 0x08]);
        let bytes = encode_datagram(&original).unwrap();
        let decoded = decode_datagram(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn datagram_rejects_trailing_garbage() {
        let original = adu(0x55, 0x02, &[0x01, 0x00, 0x00, 0x00, 0x08]);
        let mut bytes = encode_datagram(&original).unwrap();
        bytes.push(0xFF);
        assert!(decode_datagram(&bytes).is_err());
    }
}
