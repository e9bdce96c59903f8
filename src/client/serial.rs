// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generic engine shared by the two half-duplex serial transports.
//!
//! RTU and ASCII frame bytes differently (binary CRC-16 vs hex-encoded LRC)
//! but everything above framing is identical: exactly one request may be in
//! flight at a time ([`Dispatcher::serial`]), a half-duplex line may echo the
//! request back before the real response arrives, and a dropped port is
//! reopened per [`SerialErrorRecovery`] rather than
//! [`crate::config::ReconnectStrategy`]. [`SerialCoordinator`] is generic
//! over the transport (so a caller-attached port and one this crate opened
//! itself share the same logic) and over the codec (so RTU and ASCII share
//! it too).

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
    time::{sleep, timeout},
};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::{
    client::{
        coordinator::with_retries, is_broadcast_writeable, synthesize_broadcast_response, Client,
    },
    codec::SerialAdu,
    config::{SerialConfig, SerialErrorRecovery},
    dispatch::Dispatcher,
    pdu::{self, Request, Response},
    slave::{Slave, SlaveContext},
    Error,
};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Redial<T> = Box<dyn Fn() -> BoxFuture<Result<T, Error>> + Send + Sync>;

/// Mirrors [`crate::client::coordinator::Backoff`] but driven by
/// [`SerialErrorRecovery`], whose `Link` variant (a fixed delay, not
/// doubling) has no counterpart in [`crate::config::ReconnectStrategy`].
#[derive(Debug)]
struct SerialBackoff {
    recovery: SerialErrorRecovery,
    current: Duration,
}

impl SerialBackoff {
    fn new(recovery: SerialErrorRecovery) -> Self {
        let current = match recovery {
            SerialErrorRecovery::ExponentialBackoff { initial, .. } => initial,
            SerialErrorRecovery::Link { delay } => delay,
            SerialErrorRecovery::Disabled => Duration::ZERO,
        };
        Self { recovery, current }
    }

    fn should_attempt(&self) -> bool {
        !matches!(self.recovery, SerialErrorRecovery::Disabled)
    }

    async fn wait(&mut self, attempt: u32) {
        if attempt == 0 {
            return;
        }
        match self.recovery {
            SerialErrorRecovery::Disabled => {}
            SerialErrorRecovery::Link { delay } => sleep(delay).await,
            SerialErrorRecovery::ExponentialBackoff { max, .. } => {
                sleep(self.current).await;
                self.current = self.current.saturating_mul(2).min(max);
            }
        }
    }

    fn reset(&mut self) {
        if let SerialErrorRecovery::ExponentialBackoff { initial, .. } = self.recovery {
            self.current = initial;
        }
    }
}

struct SerialChannel<T, C, A> {
    write: SplitSink<Framed<T, C>, A>,
    dispatcher: Arc<Dispatcher>,
    skip_next_frame: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl<T, C, A> Drop for SerialChannel<T, C, A> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl<T, C, A> SerialChannel<T, C, A>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: Decoder<Item = A, Error = crate::codec::Error>
        + Encoder<A, Error = crate::codec::Error>
        + Default
        + Send
        + 'static,
    A: SerialAdu + Send + 'static,
{
    fn spawn(transport: T) -> Self {
        let framed = Framed::new(transport, C::default());
        let (write, mut read) = framed.split();
        let dispatcher = Arc::new(Dispatcher::serial());
        let skip_next_frame = Arc::new(AtomicBool::new(false));

        let dispatcher_for_task = Arc::clone(&dispatcher);
        let skip_for_task = Arc::clone(&skip_next_frame);
        let reader_task = tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(adu) => {
                        if skip_for_task.swap(false, Ordering::SeqCst) {
                            log::trace!("dropping local echo frame on serial port");
                            continue;
                        }
                        let mut payload = BytesMut::with_capacity(1 + adu.pdu().len());
                        payload.extend_from_slice(&[adu.slave_id()]);
                        payload.extend_from_slice(adu.pdu());
                        if !dispatcher_for_task.complete_serial(payload.freeze()) {
                            log::trace!("discarding unsolicited serial response");
                        }
                    }
                    Err(err) => {
                        log::debug!("serial port closed: {err}");
                        break;
                    }
                }
            }
            dispatcher_for_task.fail_all(|| Error::ChannelClosed);
        });

        Self {
            write,
            dispatcher,
            skip_next_frame,
            reader_task,
        }
    }

    async fn send(&mut self, adu: A, expect_echo: bool) -> Result<(), Error> {
        if expect_echo {
            self.skip_next_frame.store(true, Ordering::SeqCst);
        }
        self.write.send(adu).await.map_err(Error::from_codec)
    }
}

pub(crate) struct SerialCoordinator<T, C, A> {
    channel: Mutex<Option<SerialChannel<T, C, A>>>,
    redial: Option<Redial<T>>,
    // A tokio mutex, not std: `ensure_connected` holds this across the
    // `backoff.wait(...).await` sleep, which a std::sync::MutexGuard cannot do.
    backoff: Mutex<SerialBackoff>,
    config: SerialConfig,
    slave: std::sync::Mutex<Slave>,
}

impl<T, C, A> SerialCoordinator<T, C, A>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: Decoder<Item = A, Error = crate::codec::Error>
        + Encoder<A, Error = crate::codec::Error>
        + Default
        + Send
        + 'static,
    A: SerialAdu + Send + 'static,
{
    pub(crate) fn new(
        transport: T,
        slave: Slave,
        config: SerialConfig,
        redial: Option<Redial<T>>,
    ) -> Self {
        let backoff = SerialBackoff::new(config.error_recovery());
        Self {
            channel: Mutex::new(Some(SerialChannel::spawn(transport))),
            redial,
            backoff: Mutex::new(backoff),
            config,
            slave: std::sync::Mutex::new(slave),
        }
    }

    async fn ensure_connected(&self, attempt: u32) -> Result<(), Error> {
        if self.channel.lock().await.is_some() {
            return Ok(());
        }
        let Some(redial) = self.redial.as_ref() else {
            return Err(Error::NotConnected);
        };
        if !self.backoff.lock().await.should_attempt() {
            return Err(Error::NotConnected);
        }
        self.backoff.lock().await.wait(attempt).await;
        let transport = redial().await?;
        let mut guard = self.channel.lock().await;
        *guard = Some(SerialChannel::spawn(transport));
        self.backoff.lock().await.reset();
        Ok(())
    }

    async fn send_and_await(
        &self,
        guard: &mut Option<SerialChannel<T, C, A>>,
        slave_id: u8,
        pdu: Vec<u8>,
    ) -> Result<Bytes, Error> {
        let channel = guard.as_mut().ok_or(Error::NotConnected)?;
        let waiter = channel
            .dispatcher
            .register_serial()
            .ok_or(Error::TooManyPendingRequests)?;
        let adu = A::new(slave_id, pdu);
        let expect_echo = self.config.handle_local_echo();
        if let Err(err) = channel.send(adu, expect_echo).await {
            *guard = None;
            return Err(err);
        }
        match timeout(self.config.request_timeout(), waiter).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_recv_error)) => {
                *guard = None;
                Err(Error::ChannelClosed)
            }
            Err(_elapsed) => {
                if let Some(channel) = guard.as_ref() {
                    channel.dispatcher.cancel_serial();
                }
                Err(Error::Timeout)
            }
        }
    }

    pub(crate) async fn call(&self, request: Request) -> Result<Response, Error> {
        pdu::validate_request(&request).map_err(Error::InvalidParameter)?;
        let fc = pdu::function_code_of(&request);
        let slave = *self.slave.lock().unwrap();
        let slave_id: u8 = slave.into();

        if slave.is_broadcast() && is_broadcast_writeable(fc) {
            let pdu_bytes = pdu::build_request(&request);
            let retries = self.config.retries();
            return with_retries(retries, |attempt| async move {
                self.ensure_connected(attempt).await?;
                let mut guard = self.channel.lock().await;
                let channel = guard.as_mut().ok_or(Error::NotConnected)?;
                let adu = A::new(slave_id, pdu_bytes.clone());
                let expect_echo = self.config.handle_local_echo();
                if let Err(err) = channel.send(adu, expect_echo).await {
                    *guard = None;
                    return Err(err);
                }
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
                let payload = self.send_and_await(&mut guard, slave_id, pdu_bytes).await?;
                let got_slave_id = payload[0];
                // Exception surfaces before the unit id check: a wrong-unit
                // exception frame is still a modbus exception, not a mismatch.
                if payload[1] & 0x80 != 0 {
                    return pdu::parse_response(request_ref, &payload[1..]).map_err(Error::from_pdu);
                }
                if got_slave_id != slave_id {
                    return Err(Error::UnitIdMismatch {
                        expected: slave_id,
                        got: got_slave_id,
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
impl<T, C, A> Client for SerialCoordinator<T, C, A>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: Decoder<Item = A, Error = crate::codec::Error>
        + Encoder<A, Error = crate::codec::Error>
        + Default
        + Send
        + 'static,
    A: SerialAdu + Send + 'static,
{
    async fn call(&mut self, request: Request) -> Result<Response, Error> {
        SerialCoordinator::call(self, request).await
    }
}

impl<T, C, A> SlaveContext for SerialCoordinator<T, C, A> {
    fn set_slave(&mut self, slave: Slave) {
        *self.slave.lock().unwrap() = slave;
    }
}

pub(crate) fn boxed_redial<T, F, Fut>(dial: F) -> Redial<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    Box::new(move || Box::pin(dial()) as BoxFuture<Result<T, Error>>)
}

fn tokio_serial_data_bits(bits: crate::config::DataBits) -> tokio_serial::DataBits {
    match bits {
        crate::config::DataBits::Seven => tokio_serial::DataBits::Seven,
        crate::config::DataBits::Eight => tokio_serial::DataBits::Eight,
    }
}

fn tokio_serial_parity(parity: crate::config::Parity) -> tokio_serial::Parity {
    match parity {
        crate::config::Parity::None => tokio_serial::Parity::None,
        crate::config::Parity::Even => tokio_serial::Parity::Even,
        crate::config::Parity::Odd => tokio_serial::Parity::Odd,
    }
}

fn tokio_serial_stop_bits(stop_bits: crate::config::StopBits) -> tokio_serial::StopBits {
    match stop_bits {
        crate::config::StopBits::One => tokio_serial::StopBits::One,
        crate::config::StopBits::Two => tokio_serial::StopBits::Two,
    }
}

/// Opens the serial port described by `config`, used both for the initial
/// connection and for every reopen a [`SerialErrorRecovery`] policy triggers.
pub(crate) fn open_port(config: &SerialConfig) -> Result<tokio_serial::SerialStream, Error> {
    let builder = tokio_serial::new(config.path(), config.baud_rate())
        .data_bits(tokio_serial_data_bits(config.data_bits()))
        .parity(tokio_serial_parity(config.parity()))
        .stop_bits(tokio_serial_stop_bits(config.stop_bits()));
    tokio_serial::SerialStream::open(&builder)
        .map_err(|err| Error::ConnectionFailed(format!("{}: {err}", config.path())))
}
