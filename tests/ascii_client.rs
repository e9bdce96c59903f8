// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exercises the ASCII client over an in-memory duplex pipe standing in for
//! a serial port.

mod common;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{ascii_frame, read_holding_registers_response_pdu};
use modbus_client::client::ascii;
use modbus_client::config::{DataBits, SerialConfig};
use modbus_client::prelude::*;
use modbus_client::Slave;

#[tokio::test]
async fn reads_holding_registers_over_ascii() {
    let (client_side, mut server_side) = tokio::io::duplex(256);

    let server = tokio::spawn(async move {
        // ':' + hex(slave id + FC 0x03 + addr(2) + count(2) + LRC) + CR LF
        let mut buf = vec![0u8; 1 + 2 * 6 + 2];
        server_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], b':');

        let response_pdu = read_holding_registers_response_pdu(&[7]);
        server_side
            .write_all(&ascii_frame(1, &response_pdu))
            .await
            .unwrap();
    });

    let config = SerialConfig::new("/dev/ttyMOCK", DataBits::Seven);
    let mut ctx = ascii::attach_slave(client_side, Slave(1), config);
    let words = ctx.read_holding_registers(0, 1).await.unwrap();
    assert_eq!(words, vec![7]);

    server.await.unwrap();
}
