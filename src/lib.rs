// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![cfg_attr(not(test), warn(unsafe_code))]
#![warn(clippy::all)]
#![warn(clippy::cast_lossless)]
#![warn(clippy::explicit_deref_methods)]
#![warn(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

pub mod bytes;
pub mod checksum;
pub mod client;
pub mod codec;
pub mod config;
mod dispatch;
mod error;
pub mod pdu;
pub mod prelude;
pub mod slave;
mod txid;

pub use error::{Error, Result};
pub use pdu::{Exception, ExceptionResponse, FunctionCode, Request, Response};
pub use slave::{Slave, SlaveContext, SlaveId};
