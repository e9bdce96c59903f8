// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Binary RTU framing over a serial line (CRC-16).

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

use super::{
    serial::{boxed_redial, open_port, SerialCoordinator},
    Client, Context,
};
use crate::{
    codec::rtu::{Adu, ClientCodec},
    config::SerialConfig,
    slave::Slave,
    Error,
};

type Coordinator<T> = SerialCoordinator<T, ClientCodec, Adu>;

/// Opens the serial port named by `config`, addressing no particular slave
/// for broadcast-only traffic. Reopens the port automatically per `config`'s
/// [`crate::config::SerialErrorRecovery`].
pub async fn connect(config: SerialConfig) -> Result<Context, Error> {
    connect_slave(config, Slave::broadcast()).await
}

/// Opens the serial port named by `config`, addressing the given `slave`.
pub async fn connect_slave(config: SerialConfig, slave: Slave) -> Result<Context, Error> {
    let transport = open_port(&config)?;
    let redial_config = config.clone();
    let redial = boxed_redial(move || {
        let config = redial_config.clone();
        async move { open_port(&config) }
    });
    let coordinator = Coordinator::new(transport, slave, config, Some(redial));
    Ok(Context::from(Box::new(coordinator) as Box<dyn Client>))
}

/// Attaches a client to a serial transport the caller already owns,
/// addressing no particular slave. The returned [`Context`] never reconnects
/// on its own: the crate has no way to reopen a transport it was only ever
/// handed, not asked to open.
pub fn attach<T>(transport: T, config: SerialConfig) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    attach_slave(transport, Slave::broadcast(), config)
}

/// Attaches a client to a serial transport the caller already owns,
/// addressing the given `slave`. See [`attach`] for the reconnection caveat.
pub fn attach_slave<T>(transport: T, slave: Slave, config: SerialConfig) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    let coordinator = Coordinator::new(transport, slave, config, None);
    Context::from(Box::new(coordinator) as Box<dyn Client>)
}
