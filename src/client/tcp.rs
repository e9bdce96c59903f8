// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP over a plain TCP connection.

use std::fmt;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use super::{
    stream::{boxed_redial, StreamCoordinator},
    Client, Context,
};
use crate::{config::TcpConfig, slave::Slave, Error};

async fn resolve(config: &TcpConfig) -> Result<std::net::SocketAddr, Error> {
    use tokio::net::lookup_host;
    lookup_host((config.host(), config.port()))
        .await?
        .next()
        .ok_or_else(|| {
            Error::ConnectionFailed(format!(
                "no address found for {}:{}",
                config.host(),
                config.port()
            ))
        })
}

/// Connects to a Modbus TCP coupler, addressing it directly via
/// [`Slave::tcp_device`]. Reconnects automatically per `config`'s
/// [`crate::config::ReconnectStrategy`].
pub async fn connect(config: TcpConfig) -> Result<Context, Error> {
    connect_slave(config, Slave::tcp_device()).await
}

/// Connects to a physical, broadcast, or custom Modbus device, probably
/// through a TCP/RTU gateway forwarding to the addressed `slave`.
pub async fn connect_slave(config: TcpConfig, slave: Slave) -> Result<Context, Error> {
    let addr = resolve(&config).await?;
    let transport = TcpStream::connect(addr).await?;
    let redial = boxed_redial(move || async move {
        TcpStream::connect(addr).await.map_err(Error::from)
    });
    let coordinator = StreamCoordinator::new(transport, slave, config, Some(redial));
    Ok(Context::from(Box::new(coordinator) as Box<dyn Client>))
}

/// Attaches a client to a transport the caller already owns, addressing it
/// directly via [`Slave::tcp_device`]. The returned [`Context`] never
/// reconnects on its own: the crate has no way to recreate a transport it
/// was only ever handed, not asked to open.
pub fn attach<T>(transport: T, config: TcpConfig) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    attach_slave(transport, Slave::tcp_device(), config)
}

/// Attaches a client to a transport the caller already owns, addressing the
/// given `slave`. See [`attach`] for the reconnection caveat.
pub fn attach_slave<T>(transport: T, slave: Slave, config: TcpConfig) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    let coordinator = StreamCoordinator::new(transport, slave, config, None);
    Context::from(Box::new(coordinator) as Box<dyn Client>)
}
