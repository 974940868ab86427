// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stream multiplexing: per-stream send/receive halves and the manager
//! that owns them.

pub mod manager;
pub mod recv;
pub mod send;

pub use manager::StreamManager;
pub use recv::{ReadOutcome, RecvStream};
pub use send::{SendStream, SentRange, Transmission};
