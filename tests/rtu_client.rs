// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exercises the RTU client over an in-memory duplex pipe standing in for a
//! serial port, including local-echo handling on a simulated half-duplex
//! line.

mod common;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{read_holding_registers_response_pdu, rtu_frame};
use modbus_client::client::rtu;
use modbus_client::config::{DataBits, SerialConfig};
use modbus_client::prelude::*;
use modbus_client::Slave;

fn config() -> SerialConfig {
    SerialConfig::new("/dev/ttyMOCK", DataBits::Eight).with_request_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn reads_holding_registers_over_rtu() {
    let (client_side, mut server_side) = tokio::io::duplex(256);

    let server = tokio::spawn(async move {
        let mut buf = vec![0u8; 8];
        server_side.read_exact(&mut buf).await.unwrap();
        // slave id + FC 0x03 + addr(2) + count(2) + crc(2)
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..6], &[0x03, 0x00, 0x00, 0x00, 0x02]);

        let response_pdu = read_holding_registers_response_pdu(&[10, 20]);
        server_side
            .write_all(&rtu_frame(1, &response_pdu))
            .await
            .unwrap();
    });

    let mut ctx = rtu::attach_slave(client_side, Slave(1), config());
    let words = ctx.read_holding_registers(0, 2).await.unwrap();
    assert_eq!(words, vec![10, 20]);

    server.await.unwrap();
}

#[tokio::test]
async fn drops_exactly_one_local_echo_frame_before_the_real_response() {
    let (client_side, mut server_side) = tokio::io::duplex(256);

    let server = tokio::spawn(async move {
        // The half-duplex line loops the request straight back first.
        let mut echo = vec![0u8; 8];
        server_side.read_exact(&mut echo).await.unwrap();
        server_side.write_all(&echo).await.unwrap();

        // Now send the real response.
        let response_pdu = read_holding_registers_response_pdu(&[42]);
        server_side
            .write_all(&rtu_frame(echo[0], &response_pdu))
            .await
            .unwrap();
    });

    let config = config().with_handle_local_echo(true);
    let mut ctx = rtu::attach_slave(client_side, Slave(1), config);
    let words = ctx.read_holding_registers(0, 1).await.unwrap();
    assert_eq!(words, vec![42]);

    server.await.unwrap();
}

#[tokio::test]
async fn a_request_times_out_when_nothing_answers_on_the_line() {
    let (client_side, _server_side) = tokio::io::duplex(256);
    let short_timeout = config()
        .with_request_timeout(Duration::from_millis(50))
        .with_retries(0);
    let mut ctx = rtu::attach_slave(client_side, Slave(1), short_timeout);

    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    assert!(matches!(err, modbus_client::Error::Timeout));
}

#[tokio::test]
async fn a_response_addressed_to_a_different_slave_is_rejected() {
    let (client_side, mut server_side) = tokio::io::duplex(256);

    let server = tokio::spawn(async move {
        let mut req = vec![0u8; 8];
        server_side.read_exact(&mut req).await.unwrap();
        let response_pdu = read_holding_registers_response_pdu(&[1]);
        // Echo back as slave 2 instead of the addressed slave 1.
        server_side
            .write_all(&rtu_frame(2, &response_pdu))
            .await
            .unwrap();
    });

    let mut ctx = rtu::attach_slave(client_side, Slave(1), config());
    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    assert!(matches!(err, modbus_client::Error::UnitIdMismatch { .. }));

    server.await.unwrap();
}
