// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default TCP transport connector.

use std::net::SocketAddr;

use tokio::net::TcpStream;

/// Open a plain TCP connection to a Modbus TCP coupler.
pub async fn connect(socket_addr: SocketAddr) -> std::io::Result<TcpStream> {
    TcpStream::connect(socket_addr).await
}
