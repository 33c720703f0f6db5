// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default serial transport connector.

use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Open a serial port for RTU framing, using `tokio-serial`'s builder for
/// the line settings a Modbus RTU slave expects.
pub fn connect(path: &str, baud_rate: u32) -> std::io::Result<SerialStream> {
    tokio_serial::new(path, baud_rate).open_native_async()
}
