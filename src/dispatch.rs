// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response dispatch: matches inbound ADUs to the waiter that requested
//! them.
//!
//! Two modes, selected at client construction (see the protocol spec's
//! response-dispatcher component): [`Dispatcher::serial`] allows at most one
//! request in flight and matches the next inbound frame to it regardless of
//! any transaction ID; [`Dispatcher::pipelining`] matches by transaction ID
//! and is bounded by `max_in_flight`.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{txid::TransactionId, Error};

type WaiterTx = oneshot::Sender<Result<Bytes, Error>>;
/// The receiving half handed back to a caller awaiting its response.
pub(crate) type WaiterRx = oneshot::Receiver<Result<Bytes, Error>>;

enum Mode {
    Serial {
        pending: Option<WaiterTx>,
    },
    Pipelining {
        waiters: HashMap<TransactionId, WaiterTx>,
        max_in_flight: usize,
    },
}

pub(crate) struct Dispatcher {
    mode: Mutex<Mode>,
}

impl Dispatcher {
    pub(crate) fn serial() -> Self {
        Self {
            mode: Mutex::new(Mode::Serial { pending: None }),
        }
    }

    pub(crate) fn pipelining(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.clamp(1, 65535);
        Self {
            mode: Mutex::new(Mode::Pipelining {
                waiters: HashMap::new(),
                max_in_flight,
            }),
        }
    }

    /// Registers a waiter for the single pending slot (serial mode). Returns
    /// `None` if a request is already in flight; the caller must wait for it
    /// to complete first.
    pub(crate) fn register_serial(&self) -> Option<WaiterRx> {
        let mut mode = self.mode.lock().unwrap();
        match &mut *mode {
            Mode::Serial { pending } => {
                if pending.is_some() {
                    return None;
                }
                let (tx, rx) = oneshot::channel();
                *pending = Some(tx);
                Some(rx)
            }
            Mode::Pipelining { .. } => unreachable!("serial registration on pipelining dispatcher"),
        }
    }

    /// Registers a waiter for `txid` (pipelining mode).
    ///
    /// Fails with [`Error::TooManyPendingRequests`] if `max_in_flight` has
    /// been reached, or [`Error::TransactionIdInUse`] if `txid` already has
    /// a pending waiter.
    pub(crate) fn register_pipelined(&self, txid: TransactionId) -> Result<WaiterRx, Error> {
        let mut mode = self.mode.lock().unwrap();
        match &mut *mode {
            Mode::Pipelining {
                waiters,
                max_in_flight,
            } => {
                if waiters.contains_key(&txid) {
                    return Err(Error::TransactionIdInUse(txid));
                }
                if waiters.len() >= *max_in_flight {
                    return Err(Error::TooManyPendingRequests);
                }
                let (tx, rx) = oneshot::channel();
                waiters.insert(txid, tx);
                Ok(rx)
            }
            Mode::Serial { .. } => unreachable!("pipelined registration on serial dispatcher"),
        }
    }

    /// Completes the single pending waiter (serial mode) with a successful
    /// payload. Frames with no waiter registered are unsolicited and
    /// silently discarded (the caller should log them).
    pub(crate) fn complete_serial(&self, payload: Bytes) -> bool {
        let mut mode = self.mode.lock().unwrap();
        match &mut *mode {
            Mode::Serial { pending } => match pending.take() {
                Some(tx) => {
                    let _ = tx.send(Ok(payload));
                    true
                }
                None => false,
            },
            Mode::Pipelining { .. } => unreachable!(),
        }
    }

    /// Completes the waiter for `txid` (pipelining mode). Returns `false`
    /// (and discards `payload`) if no waiter is registered for `txid` —
    /// either unsolicited or a late response to an already-cancelled call.
    pub(crate) fn complete_pipelined(&self, txid: TransactionId, payload: Bytes) -> bool {
        let mut mode = self.mode.lock().unwrap();
        match &mut *mode {
            Mode::Pipelining { waiters, .. } => match waiters.remove(&txid) {
                Some(tx) => {
                    let _ = tx.send(Ok(payload));
                    true
                }
                None => false,
            },
            Mode::Serial { .. } => unreachable!(),
        }
    }

    /// Removes a waiter without completing it, e.g. after the caller's task
    /// was cancelled. In serial mode this frees the single slot for the
    /// next call; in pipelining mode any later response for `txid` becomes
    /// unsolicited and is discarded.
    pub(crate) fn cancel_serial(&self) {
        let mut mode = self.mode.lock().unwrap();
        if let Mode::Serial { pending } = &mut *mode {
            *pending = None;
        }
    }

    pub(crate) fn cancel_pipelined(&self, txid: TransactionId) {
        let mut mode = self.mode.lock().unwrap();
        if let Mode::Pipelining { waiters, .. } = &mut *mode {
            waiters.remove(&txid);
        }
    }

    /// Fails every pending waiter with `err`'s message, draining the
    /// dispatcher. Called when the channel becomes inactive.
    pub(crate) fn fail_all(&self, make_err: impl Fn() -> Error) {
        let mut mode = self.mode.lock().unwrap();
        match &mut *mode {
            Mode::Serial { pending } => {
                if let Some(tx) = pending.take() {
                    let _ = tx.send(Err(make_err()));
                }
            }
            Mode::Pipelining { waiters, .. } => {
                for (_, tx) in waiters.drain() {
                    let _ = tx.send(Err(make_err()));
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        let mode = self.mode.lock().unwrap();
        match &*mode {
            Mode::Serial { pending } => usize::from(pending.is_some()),
            Mode::Pipelining { waiters, .. } => waiters.len(),
        }
    }
}
