// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Convenience re-exports. `use modbus_client::prelude::*;` pulls in the
//! traits and types almost every caller needs, plus one module per enabled
//! transport.

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::client;

#[allow(missing_docs)]
#[cfg(feature = "rtu")]
pub mod rtu {
    pub use crate::client::rtu::*;
}

#[allow(missing_docs)]
#[cfg(feature = "ascii")]
pub mod ascii {
    pub use crate::client::ascii::*;
}

#[allow(missing_docs)]
#[cfg(feature = "tcp")]
pub mod tcp {
    pub use crate::client::tcp::*;
}

#[allow(missing_docs)]
#[cfg(feature = "tls")]
pub mod tls {
    pub use crate::client::tls::*;
}

#[allow(missing_docs)]
#[cfg(feature = "udp")]
pub mod udp {
    pub use crate::client::udp::*;
}

///////////////////////////////////////////////////////////////////
/// Structs and enums
///////////////////////////////////////////////////////////////////
pub use crate::pdu::{Exception, ExceptionResponse, FunctionCode, Request, Response};
pub use crate::slave::{Slave, SlaveId};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::client::{Client, Reader, Writer};
pub use crate::slave::SlaveContext;

///////////////////////////////////////////////////////////////////
/// Errors
///////////////////////////////////////////////////////////////////
pub use crate::{Error, Result};
