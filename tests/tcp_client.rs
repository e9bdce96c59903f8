// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exercises the TCP client against a hand-written MBAP server task, since
//! this crate ships no server implementation of its own.

mod common;

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use common::{exception_response_pdu, mbap_frame, read_holding_registers_response_pdu, read_mbap_request};
use modbus_client::client::tcp;
use modbus_client::prelude::*;
use modbus_client::{Error, Slave};

#[tokio::test]
async fn reads_holding_registers_over_a_plain_tcp_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let (transaction_id, unit_id, pdu) = read_mbap_request(&mut socket).await;
        assert_eq!(unit_id, Slave::tcp_device().0);
        assert_eq!(pdu, vec![0x03, 0x00, 0x00, 0x00, 0x03]);
        let response = read_holding_registers_response_pdu(&[1, 2, 3]);
        socket
            .write_all(&mbap_frame(transaction_id, unit_id, &response))
            .await
            .unwrap();
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut ctx = tcp::attach(stream, modbus_client::config::TcpConfig::new(addr.ip().to_string()));

    let words = ctx.read_holding_registers(0, 3).await.unwrap();
    assert_eq!(words, vec![1, 2, 3]);

    server.await.unwrap();
}

#[tokio::test]
async fn a_server_exception_surfaces_as_a_modbus_exception_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let (transaction_id, unit_id, _pdu) = read_mbap_request(&mut socket).await;
        let response = exception_response_pdu(0x03, 0x02); // IllegalDataAddress
        socket
            .write_all(&mbap_frame(transaction_id, unit_id, &response))
            .await
            .unwrap();
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut ctx = tcp::attach(stream, modbus_client::config::TcpConfig::new(addr.ip().to_string()));

    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    assert!(matches!(err, Error::ModbusException(_)));

    server.await.unwrap();
}

#[tokio::test]
async fn a_request_times_out_when_the_server_never_answers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        // Never respond; hold the connection open past the client's timeout.
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(socket);
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let config = modbus_client::config::TcpConfig::new(addr.ip().to_string())
        .with_request_timeout(Duration::from_millis(100))
        .with_retries(0);
    let mut ctx = tcp::attach(stream, config);

    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    assert!(matches!(err, Error::Timeout));

    server.abort();
}

#[tokio::test]
async fn an_attached_client_never_reconnects_on_its_own() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket); // close immediately
    });
    server.await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    // Give the OS a moment to deliver the peer's FIN.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ctx = tcp::attach(stream, modbus_client::config::TcpConfig::new(addr.ip().to_string()));
    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    // Either the half-closed socket surfaces as a channel/IO error on the
    // first attempt, or (if the FIN hadn't arrived yet) as NotConnected on a
    // retry; either way no redial closure exists to paper over it.
    assert!(matches!(
        err,
        Error::ChannelClosed | Error::IoError(_) | Error::NotConnected
    ));
}
