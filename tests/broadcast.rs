// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast writes (unit id 0) get no server response at all; the client
//! must synthesize the echo rather than wait for one.

mod common;

use tokio::net::{TcpListener, TcpStream};

use common::read_mbap_request;
use modbus_client::client::tcp;
use modbus_client::config::TcpConfig;
use modbus_client::prelude::*;
use modbus_client::{Response, Slave};

#[tokio::test]
async fn a_broadcast_write_completes_without_waiting_for_a_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let (_transaction_id, unit_id, pdu) = read_mbap_request(&mut socket).await;
        assert_eq!(unit_id, 0);
        assert_eq!(pdu, vec![0x05, 0x00, 0x10, 0xFF, 0x00]);
        // Deliberately never write a response: a broadcast gets none.
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let config = TcpConfig::new(addr.ip().to_string());
    let mut ctx = tcp::attach_slave(stream, Slave::broadcast(), config);

    ctx.write_single_coil(0x10, true).await.unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn a_broadcast_response_is_synthesized_not_parsed_from_the_wire() {
    use modbus_client::client::Client as _;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_mbap_request(&mut socket).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let config = TcpConfig::new(addr.ip().to_string());
    let mut ctx = tcp::attach_slave(stream, Slave::broadcast(), config);

    let response = ctx
        .call(modbus_client::Request::WriteSingleCoil(0x10, true))
        .await
        .unwrap();
    assert_eq!(response, Response::WriteSingleCoil(0x10));

    server.await.unwrap();
}
