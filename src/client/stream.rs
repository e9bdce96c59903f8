// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generic MBAP-over-a-stream engine shared by the TCP and TLS transports.
//!
//! A [`StreamCoordinator`] owns at most one live [`MbapChannel`] plus,
//! optionally, a *redial* closure that knows how to open a fresh one. A
//! `connect`-built client carries a redial closure and reconnects
//! automatically per its [`RetryPolicy`]; an `attach`-built client (wrapping
//! a transport the caller constructed and handed over) has none, since the
//! crate has no way to recreate a transport it was only ever given once —
//! such a client surfaces `NotConnected` instead of redialing.

use std::{future::Future, pin::Pin, sync::Arc, time::Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
    time::timeout,
};
use tokio_util::codec::Framed;

use crate::{
    client::{
        coordinator::{with_retries, Backoff, RetryPolicy},
        is_broadcast_writeable, synthesize_broadcast_response, Client,
    },
    codec::mbap::{self, Adu, MbapHeader},
    config::TcpConfig,
    dispatch::Dispatcher,
    pdu::{self, Request, Response},
    slave::{Slave, SlaveContext},
    txid::TransactionIdAllocator,
    Error,
};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Redial<T> = Box<dyn Fn() -> BoxFuture<Result<T, Error>> + Send + Sync>;

struct MbapChannel<T> {
    write: SplitSink<Framed<T, mbap::ClientCodec>, Adu>,
    dispatcher: Arc<Dispatcher>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl<T> Drop for MbapChannel<T> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl<T> MbapChannel<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn spawn(transport: T, max_in_flight: usize) -> Self {
        let framed = Framed::new(transport, mbap::ClientCodec);
        let (write, mut read) = framed.split();
        let dispatcher = Arc::new(Dispatcher::pipelining(max_in_flight));
        let dispatcher_for_task = Arc::clone(&dispatcher);
        let reader_task = tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(adu) => {
                        let mut payload = BytesMut::with_capacity(1 + adu.pdu.len());
                        payload.extend_from_slice(&[adu.header.unit_id]);
                        payload.extend_from_slice(&adu.pdu);
                        if !dispatcher_for_task
                            .complete_pipelined(adu.header.transaction_id, payload.freeze())
                        {
                            log::trace!(
                                "discarding unsolicited MBAP response, transaction id {}",
                                adu.header.transaction_id
                            );
                        }
                    }
                    Err(err) => {
                        log::debug!("MBAP channel closed: {err}");
                        break;
                    }
                }
            }
            dispatcher_for_task.fail_all(|| Error::ChannelClosed);
        });
        Self {
            write,
            dispatcher,
            reader_task,
        }
    }

    async fn send(&mut self, adu: Adu) -> Result<(), Error> {
        self.write.send(adu).await.map_err(Error::from_codec)
    }
}

/// Shared engine driving a single MBAP-over-stream connection (TCP or TLS),
/// with optional automatic reconnection.
pub(crate) struct StreamCoordinator<T> {
    channel: Mutex<Option<MbapChannel<T>>>,
    redial: Option<Redial<T>>,
    // A tokio mutex, not std: `ensure_connected` holds this across the
    // `backoff.wait(...).await` sleep, which a std::sync::MutexGuard cannot do.
    backoff: Mutex<Backoff>,
    config: TcpConfig,
    last_activity: std::sync::Mutex<Instant>,
    txid: TransactionIdAllocator,
    slave: std::sync::Mutex<Slave>,
}

impl<T> StreamCoordinator<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub(crate) fn new(transport: T, slave: Slave, config: TcpConfig, redial: Option<Redial<T>>) -> Self {
        let max_in_flight = config.pipelining().max_in_flight();
        Self {
            channel: Mutex::new(Some(MbapChannel::spawn(transport, max_in_flight))),
            redial,
            backoff: Mutex::new(Backoff::new(config.reconnect())),
            config,
            last_activity: std::sync::Mutex::new(Instant::now()),
            txid: TransactionIdAllocator::default(),
            slave: std::sync::Mutex::new(slave),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    async fn ensure_connected(&self, attempt: u32) -> Result<(), Error> {
        let idle_timeout = self.config.idle_timeout();
        let mut guard = self.channel.lock().await;
        if let (Some(idle_timeout), true) = (idle_timeout, guard.is_some()) {
            if self.last_activity.lock().unwrap().elapsed() > idle_timeout {
                log::debug!("idle timeout exceeded, closing the MBAP channel proactively");
                *guard = None;
            }
        }
        if guard.is_some() {
            return Ok(());
        }
        let Some(redial) = &self.redial else {
            return Err(Error::NotConnected);
        };
        let strategy = self.config.reconnect();
        let may_attempt = match strategy {
            RetryPolicy::Disabled => false,
            RetryPolicy::Immediate => attempt == 0,
            RetryPolicy::ExponentialBackoff { .. } => true,
        };
        if !may_attempt {
            return Err(Error::NotConnected);
        }
        self.backoff.lock().await.wait(attempt).await;
        match redial().await {
            Ok(transport) => {
                let max_in_flight = self.config.pipelining().max_in_flight();
                *guard = Some(MbapChannel::spawn(transport, max_in_flight));
                self.backoff.lock().await.reset();
                self.touch();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn send_and_await(
        &self,
        guard: &mut Option<MbapChannel<T>>,
        unit_id: u8,
        pdu: Vec<u8>,
    ) -> Result<Bytes, Error> {
        let channel = guard.as_mut().ok_or(Error::NotConnected)?;
        let transaction_id = self.txid.next();
        let waiter = channel
            .dispatcher
            .register_pipelined(transaction_id)?;
        let adu = Adu {
            header: MbapHeader {
                transaction_id,
                unit_id,
            },
            pdu,
        };
        if let Err(err) = channel.send(adu).await {
            channel.dispatcher.cancel_pipelined(transaction_id);
            *guard = None;
            return Err(err);
        }
        match timeout(self.config.request_timeout(), waiter).await {
            Ok(Ok(Ok(payload))) => {
                self.touch();
                Ok(payload)
            }
            Ok(Ok(Err(err))) => {
                *guard = None;
                Err(err)
            }
            Ok(Err(_recv_error)) => {
                *guard = None;
                Err(Error::ChannelClosed)
            }
            Err(_elapsed) => {
                if let Some(channel) = guard.as_ref() {
                    channel.dispatcher.cancel_pipelined(transaction_id);
                }
                Err(Error::Timeout)
            }
        }
    }

    pub(crate) async fn call(&self, request: Request) -> Result<Response, Error> {
        pdu::validate_request(&request).map_err(Error::InvalidParameter)?;
        let slave = *self.slave.lock().unwrap();
        let fc = pdu::function_code_of(&request);
        if slave.is_broadcast() && is_broadcast_writeable(fc) {
            let pdu_bytes = pdu::build_request(&request);
            let retries = self.config.retries();
            return with_retries(retries, |attempt| async move {
                self.ensure_connected(attempt).await?;
                let mut guard = self.channel.lock().await;
                let channel = guard.as_mut().ok_or(Error::NotConnected)?;
                let transaction_id = self.txid.next();
                let adu = Adu {
                    header: MbapHeader {
                        transaction_id,
                        unit_id: slave.into(),
                    },
                    pdu: pdu_bytes.clone(),
                };
                if let Err(err) = channel.send(adu).await {
                    *guard = None;
                    return Err(err);
                }
                self.touch();
                Ok(synthesize_broadcast_response(&request)
                    .expect("is_broadcast_writeable only allows synthesizable requests"))
            })
            .await;
        }

        let pdu_bytes = pdu::build_request(&request);
        let retries = self.config.retries();
        let request_ref = &request;
        with_retries(retries, move |attempt| {
            let pdu_bytes = pdu_bytes.clone();
            async move {
                self.ensure_connected(attempt).await?;
                let mut guard = self.channel.lock().await;
                let payload = self
                    .send_and_await(&mut guard, slave.into(), pdu_bytes)
                    .await?;
                drop(guard);
                let got_unit_id = payload[0];
                let expected_unit_id: u8 = slave.into();
                if got_unit_id != expected_unit_id {
                    return Err(Error::UnitIdMismatch {
                        expected: expected_unit_id,
                        got: got_unit_id,
                    });
                }
                pdu::parse_response(request_ref, &payload[1..]).map_err(Error::from_pdu)
            }
        })
        .await
    }

    pub(crate) fn set_slave(&self, slave: Slave) {
        *self.slave.lock().unwrap() = slave;
    }
}

#[async_trait]
impl<T> Client for StreamCoordinator<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn call(&mut self, request: Request) -> Result<Response, Error> {
        StreamCoordinator::call(self, request).await
    }
}

impl<T> SlaveContext for StreamCoordinator<T> {
    fn set_slave(&mut self, slave: Slave) {
        StreamCoordinator::set_slave(self, slave);
    }
}

pub(crate) fn boxed_redial<T, F, Fut>(dial: F) -> Redial<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    Box::new(move || Box::pin(dial()) as BoxFuture<Result<T, Error>>)
}
