// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP over a connectionless UDP socket.
//!
//! There is no stream to frame: each request becomes exactly one outbound
//! datagram and each response is expected as exactly one inbound datagram,
//! via [`crate::codec::mbap::encode_datagram`]/[`decode_datagram`]. A
//! background task owns the socket's receive half and dispatches inbound
//! datagrams to the waiting caller by transaction ID, the same as the
//! streaming transports' pipelining mode.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::{net::UdpSocket, time::timeout};

use super::{
    coordinator::with_retries, is_broadcast_writeable, synthesize_broadcast_response, Client,
    Context,
};
use crate::{
    codec::mbap::{self, Adu, MbapHeader},
    config::UdpConfig,
    dispatch::Dispatcher,
    pdu::{self, Request, Response},
    slave::{Slave, SlaveContext},
    txid::TransactionIdAllocator,
    Error,
};

/// Largest possible MBAP/TCP datagram (7-byte header + 253-byte PDU).
const MAX_DATAGRAM_LEN: usize = mbap::HEADER_LEN + mbap::MAX_PDU_LEN;

/// Bound on simultaneously in-flight requests. UDP carries no per-connection
/// handshake to size this against, so it is a fixed, generous constant
/// rather than a configurable knob.
const MAX_IN_FLIGHT: usize = 64;

struct UdpClient {
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
    recv_task: tokio::task::JoinHandle<()>,
    txid: TransactionIdAllocator,
    slave: Slave,
    config: UdpConfig,
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

impl UdpClient {
    async fn send_datagram(&self, adu: &Adu) -> Result<(), Error> {
        let datagram = mbap::encode_datagram(adu).map_err(Error::from_codec)?;
        self.socket.send(&datagram).await?;
        Ok(())
    }

    async fn call(&self, request: Request) -> Result<Response, Error> {
        pdu::validate_request(&request).map_err(Error::InvalidParameter)?;
        let fc = pdu::function_code_of(&request);
        let unit_id: u8 = self.slave.into();

        if self.slave.is_broadcast() && is_broadcast_writeable(fc) {
            let pdu_bytes = pdu::build_request(&request);
            let retries = self.config.retries();
            return with_retries(retries, |_attempt| async {
                let adu = Adu {
                    header: MbapHeader {
                        transaction_id: self.txid.next(),
                        unit_id,
                    },
                    pdu: pdu_bytes.clone(),
                };
                self.send_datagram(&adu).await?;
                Ok(synthesize_broadcast_response(&request)
                    .expect("is_broadcast_writeable only allows synthesizable requests"))
            })
            .await;
        }

        let pdu_bytes = pdu::build_request(&request);
        let retries = self.config.retries();
        let request_ref = &request;
        with_retries(retries, move |_attempt| {
            let pdu_bytes = pdu_bytes.clone();
            async move {
                let transaction_id = self.txid.next();
                let waiter = self.dispatcher.register_pipelined(transaction_id)?;
                let adu = Adu {
                    header: MbapHeader {
                        transaction_id,
                        unit_id,
                    },
                    pdu: pdu_bytes,
                };
                if let Err(err) = self.send_datagram(&adu).await {
                    self.dispatcher.cancel_pipelined(transaction_id);
                    return Err(err);
                }
                match timeout(self.config.request_timeout(), waiter).await {
                    Ok(Ok(Ok(payload))) => {
                        let got_unit_id = payload[0];
                        if got_unit_id != unit_id {
                            return Err(Error::UnitIdMismatch {
                                expected: unit_id,
                                got: got_unit_id,
                            });
                        }
                        pdu::parse_response(request_ref, &payload[1..]).map_err(Error::from_pdu)
                    }
                    Ok(Ok(Err(err))) => Err(err),
                    Ok(Err(_recv_error)) => Err(Error::ChannelClosed),
                    Err(_elapsed) => {
                        self.dispatcher.cancel_pipelined(transaction_id);
                        Err(Error::Timeout)
                    }
                }
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl Client for UdpClient {
    async fn call(&mut self, request: Request) -> Result<Response, Error> {
        UdpClient::call(self, request).await
    }
}

impl SlaveContext for UdpClient {
    fn set_slave(&mut self, slave: Slave) {
        self.slave = slave;
    }
}

async fn resolve(config: &UdpConfig) -> Result<std::net::SocketAddr, Error> {
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

/// Connects a UDP socket to a Modbus/TCP-over-UDP gateway, addressing it
/// directly via [`Slave::tcp_device`].
pub async fn connect(config: UdpConfig) -> Result<Context, Error> {
    connect_slave(config, Slave::tcp_device()).await
}

/// Connects a UDP socket to a physical, broadcast, or custom Modbus device.
pub async fn connect_slave(config: UdpConfig, slave: Slave) -> Result<Context, Error> {
    let addr = resolve(&config).await?;
    let bind_addr: std::net::SocketAddr = if addr.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;
    let socket = Arc::new(socket);

    let dispatcher = Arc::new(Dispatcher::pipelining(MAX_IN_FLIGHT));
    let recv_socket = Arc::clone(&socket);
    let recv_dispatcher = Arc::clone(&dispatcher);
    let recv_task = tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            match recv_socket.recv(&mut buf).await {
                Ok(n) => match mbap::decode_datagram(&buf[..n]) {
                    Ok(adu) => {
                        let mut payload = BytesMut::with_capacity(1 + adu.pdu.len());
                        payload.extend_from_slice(&[adu.header.unit_id]);
                        payload.extend_from_slice(&adu.pdu);
                        if !recv_dispatcher
                            .complete_pipelined(adu.header.transaction_id, payload.freeze())
                        {
                            log::trace!(
                                "discarding unsolicited UDP response, transaction id {}",
                                adu.header.transaction_id
                            );
                        }
                    }
                    Err(err) => log::debug!("dropping malformed UDP datagram: {err}"),
                },
                Err(err) => {
                    log::debug!("UDP socket closed: {err}");
                    break;
                }
            }
        }
        recv_dispatcher.fail_all(|| Error::ChannelClosed);
    });

    let client = UdpClient {
        socket,
        dispatcher,
        recv_task,
        txid: TransactionIdAllocator::default(),
        slave,
        config,
    };
    Ok(Context::from(Box::new(client) as Box<dyn Client>))
}
