// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane protocol between cluster peers.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod message;
mod wire;

pub use message::{
    Decision, HealthSnapshot, Heartbeat, Message, MessageKind, PrepareReq, PrepareResp,
};
pub use wire::{
    decode, encode, read_envelope, read_message, write_envelope, write_message, ProtocolError,
};
