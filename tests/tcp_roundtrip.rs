// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end exercise over a real `TcpListener`/`TcpStream` pair, mirroring
//! how the teacher crate's own integration tests race a server task against
//! a client task with `tokio::select!`.

use std::{net::SocketAddr, time::Duration};

use modbus_master::{
    dispatcher::{serve_tcp, HandlerSet},
    prelude::*,
};
use tokio::net::TcpListener;

#[tokio::test]
async fn reads_and_writes_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr: SocketAddr = "127.0.0.1:15020".parse()?;

    tokio::select! {
        result = server_context(socket_addr) => result?,
        () = client_context(socket_addr) => (),
    }

    Ok(())
}

async fn server_context(socket_addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(socket_addr).await?;
    let (stream, _peer) = listener.accept().await?;

    let mut handlers = HandlerSet::new();
    handlers.read_holding_registers =
        Some(Box::new(|address, quantity| Ok((0..quantity).map(|i| address + i).collect())));
    handlers.write_single_register = Some(Box::new(|_, _| Ok(())));
    handlers.write_multiple_registers = Some(Box::new(|_, _| Ok(())));

    serve_tcp(stream, handlers).await;
    Ok(())
}

async fn client_context(socket_addr: SocketAddr) {
    // Give the listener a moment to come up.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let config = MasterConfig::builder()
        .timeout(Duration::from_millis(500))
        .inactivity_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let master = Master::connect_tcp(socket_addr, Slave::tcp_device(), config)
        .await
        .unwrap();

    let registers = master.read_holding_registers(10, 3).await.unwrap();
    assert_eq!(registers, vec![10, 11, 12]);

    master.write_single_register(5, 42).await.unwrap();
    master
        .write_multiple_registers(0, vec![1, 2, 3])
        .await
        .unwrap();

    assert_eq!(master.state(), ConnectionState::Open);

    master.close().await.unwrap();
}
