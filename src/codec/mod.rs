// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire framing for the four transport families: MBAP (TCP/TLS/UDP), RTU
//! serial and ASCII serial.
//!
//! Each sub-module provides a [`tokio_util::codec::Decoder`] +
//! [`tokio_util::codec::Encoder`] pair suitable for [`tokio_util::codec::Framed`]
//! over a streaming transport, plus a pair of free functions for the
//! connectionless UDP path where a whole datagram arrives as a single unit.

pub mod ascii;
pub mod mbap;
pub mod rtu;

/// Common shape of a serial application data unit, implemented by both
/// [`rtu::Adu`] and [`ascii::Adu`] so the client coordinator can be written
/// once and framed with either codec.
pub(crate) trait SerialAdu: Sized {
    fn new(slave_id: u8, pdu: Vec<u8>) -> Self;
    fn slave_id(&self) -> u8;
    fn pdu(&self) -> &[u8];
}

/// Framing-layer errors: malformed headers, checksum mismatches, and PDU
/// decode failures bubbled up from [`crate::pdu`].
///
/// [`crate::Error::from_codec`] folds every variant here except [`Error::Pdu`]
/// into `Error::MbapError`; `Error::Pdu` becomes `Error::PduError` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("frame too short")]
    FrameTooShort,
    #[error("invalid length field in MBAP header: {0}")]
    InvalidLength(u16),
    #[error("invalid protocol identifier: {0:#06X}")]
    InvalidProtocolId(u16),
    #[error("incomplete frame at end of stream: {0} bytes remaining")]
    IncompleteFrameAtEof(usize),
    #[error("CRC check failed")]
    InvalidCrc,
    #[error("LRC check failed")]
    LrcError,
    #[error("invalid hex character {0:?}")]
    InvalidHexCharacter(char),
    #[error("frame encoding failed: {0}")]
    FrameEncodingFailed(String),
    #[error("frame decoding failed: {0}")]
    FrameDecodingFailed(String),
    #[error(transparent)]
    Pdu(#[from] crate::pdu::PduError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::FrameDecodingFailed(err.to_string())
    }
}
