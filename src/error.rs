// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client-facing error taxonomy.
//!
//! Codec-level failures (framing, PDU decoding) live in [`crate::codec::Error`]
//! and are folded into [`Error`] at the transport boundary via
//! [`Error::from_codec`], without discarding the original message.

use std::io;

use crate::{
    codec,
    pdu::{ExceptionResponse, PduError},
    txid::TransactionId,
};

/// A specialized [`Result`] type for Modbus client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the public client API.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An operation requires an established connection but none exists and
    /// reconnection is disabled.
    #[error("not connected")]
    NotConnected,

    /// `connect()` was called on a client that already holds a live
    /// connection.
    #[error("already connected")]
    AlreadyConnected,

    /// A connection (or reconnection) attempt failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The configured per-request timeout elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// The transaction ID echoed in the response header did not match the
    /// one sent with the request.
    #[error("transaction ID mismatch: expected {expected}, got {got}")]
    TransactionIdMismatch {
        /// The transaction ID carried by the request.
        expected: TransactionId,
        /// The transaction ID carried by the response.
        got: TransactionId,
    },

    /// The unit ID echoed in the response did not match the one addressed by
    /// the request.
    #[error("unit ID mismatch: expected {expected}, got {got}")]
    UnitIdMismatch {
        /// The unit ID addressed by the request.
        expected: u8,
        /// The unit ID carried by the response.
        got: u8,
    },

    /// The response could not be interpreted as a valid answer to the
    /// request that was sent (wrong shape, unexpected content).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The server returned a Modbus exception response.
    #[error("{0}")]
    ModbusException(#[from] ExceptionResponse),

    /// MBAP, RTU or ASCII framing failed.
    #[error("framing error: {0}")]
    MbapError(String),

    /// PDU encoding or decoding failed.
    #[error("PDU error: {0}")]
    PduError(String),

    /// The underlying transport returned an I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// A caller-supplied parameter violated a protocol invariant (counts,
    /// ranges, reference types). Never retried.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The transport channel was closed while a request was pending.
    #[error("channel closed")]
    ChannelClosed,

    /// The configured TLS context is invalid (bad certificate chain, key, or
    /// version bounds).
    #[error("TLS configuration error: {0}")]
    TlsConfigurationError(String),

    /// The TLS handshake with the remote peer failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    /// Pipelining mode's `maxInFlight` bound was reached; the request was
    /// rejected synchronously without queueing.
    #[error("too many pending requests")]
    TooManyPendingRequests,

    /// The candidate transaction ID already has a pending waiter registered.
    #[error("transaction ID {0} is already in use")]
    TransactionIdInUse(TransactionId),
}

impl Error {
    /// Fold a codec-level error into the client taxonomy without losing its
    /// message, classifying it as framing or PDU decoding.
    ///
    /// Framing errors that §7 marks retryable (`FrameTooShort`, `InvalidCRC`,
    /// `LrcError`) have no dedicated slot in the client taxonomy, so they are
    /// represented as [`Error::IoError`] instead of [`Error::MbapError`] —
    /// the closest existing variant that is itself retryable. All other
    /// framing errors indicate a malformed frame, not a transient condition,
    /// and fold into `MbapError` unchanged.
    #[must_use]
    pub fn from_codec(err: codec::Error) -> Self {
        match err {
            codec::Error::Pdu(inner) => Self::PduError(inner.to_string()),
            codec::Error::FrameTooShort | codec::Error::InvalidCrc | codec::Error::LrcError => {
                Self::IoError(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
            }
            other => Self::MbapError(other.to_string()),
        }
    }

    /// Fold a parsed-response error into the client taxonomy. A protocol
    /// exception reported by the server becomes [`Error::ModbusException`];
    /// everything else (shape mismatches, truncated payloads) becomes
    /// [`Error::PduError`].
    #[must_use]
    pub fn from_pdu(err: PduError) -> Self {
        match err {
            PduError::Exception(exception) => Self::ModbusException(exception),
            other => Self::PduError(other.to_string()),
        }
    }

    /// Whether a failed attempt with this error should be retried by the
    /// client coordinator's retry loop.
    ///
    /// `InvalidParameter`, `ModbusException`, `InvalidResponse`,
    /// `UnitIdMismatch`, `TransactionIdMismatch`, `NotConnected`,
    /// `AlreadyConnected`, `TlsConfigurationError`, `TooManyPendingRequests`
    /// and `TransactionIdInUse` are never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::IoError(_) | Self::ChannelClosed | Self::ConnectionFailed(_) | Self::TlsHandshakeFailed(_)
        )
    }

    /// A short, stable label suitable for observability pipelines.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::AlreadyConnected => "already_connected",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::Timeout => "timeout",
            Self::TransactionIdMismatch { .. } => "transaction_id_mismatch",
            Self::UnitIdMismatch { .. } => "unit_id_mismatch",
            Self::InvalidResponse(_) => "invalid_response",
            Self::ModbusException(_) => "modbus_exception",
            Self::MbapError(_) => "mbap_error",
            Self::PduError(_) => "pdu_error",
            Self::IoError(_) => "io_error",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::ChannelClosed => "channel_closed",
            Self::TlsConfigurationError(_) => "tls_configuration_error",
            Self::TlsHandshakeFailed(_) => "tls_handshake_failed",
            Self::TooManyPendingRequests => "too_many_pending_requests",
            Self::TransactionIdInUse(_) => "transaction_id_in_use",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::ChannelClosed.is_retryable());
        assert!(!Error::NotConnected.is_retryable());
        assert!(!Error::InvalidParameter("bad".into()).is_retryable());
        assert!(!Error::TooManyPendingRequests.is_retryable());
        assert!(!Error::TransactionIdInUse(7).is_retryable());
    }

    #[test]
    fn retryable_framing_errors_surface_as_io_errors() {
        let err = Error::from_codec(codec::Error::InvalidCrc);
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.is_retryable());

        let err = Error::from_codec(codec::Error::InvalidProtocolId(9));
        assert!(matches!(err, Error::MbapError(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn metric_labels_are_stable() {
        assert_eq!(Error::Timeout.metric_label(), "timeout");
        assert_eq!(
            Error::ModbusException(ExceptionResponse {
                function: 0x03,
                exception: crate::pdu::Exception::IllegalDataAddress,
            })
            .metric_label(),
            "modbus_exception"
        );
    }
}
