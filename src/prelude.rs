// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types, re-exported for a single `use modbus_master::prelude::*;`.

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::{dispatcher, error, logging, master, pdu, transport};

///////////////////////////////////////////////////////////////////
/// Structs & enums
///////////////////////////////////////////////////////////////////
pub use crate::master::{ConnectionState, Master, MasterConfig, MasterConfigBuilder, RequestOptions};
pub use crate::pdu::{ExceptionCode, FunctionCode, PduException, PduRequest, ResponseData};
pub use crate::slave::{Slave, SlaveId};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::logging::LogSink;
pub use crate::master::retry::RetryPolicy;
pub use crate::slave::SlaveContext;

///////////////////////////////////////////////////////////////////
/// Errors
///////////////////////////////////////////////////////////////////
pub use crate::error::{Error, MasterError};
pub use crate::pdu::ValidationError;
