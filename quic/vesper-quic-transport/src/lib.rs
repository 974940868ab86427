// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection orchestration for the vesper QUIC client.
//!
//! This crate composes the state machines from `vesper-quic-core` into a
//! running client connection: packet number spaces with loss recovery,
//! the stream manager and flow controllers, the path table with
//! validation and multipath scheduling, and the handshake/close
//! lifecycle. The [`api`] module wraps a connection in a single-task
//! driver future with an async handle for the application.
//!
//! A connection is wired up from its seams:
//!
//! ```ignore
//! let connection = connection::Connection::connect(config, addresses, clock.get_time())?;
//! let (handle, events, driver) = api::spawn(connection, socket, clock);
//! executor.spawn(driver);
//! let stream = handle.open_stream(StreamType::Bidirectional).await?;
//! ```

extern crate alloc;

pub mod api;
pub mod connection;
pub mod path;
pub mod space;
pub mod stream;
pub mod sync;
pub mod ticket;
pub mod transmission;

pub use api::{spawn, Driver, Events, Handle};
pub use connection::{Config, Connection, State, Stats};
