// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The asynchronous application surface.
//!
//! All connection state lives inside the [`Driver`] future and is
//! mutated only from its poll loop; handles communicate with it over an
//! unbounded command channel and receive results on oneshot channels.
//! No locks are involved, and suspension points are exactly: awaiting a
//! socket datagram, awaiting a timer, awaiting readable stream data, and
//! awaiting send capacity.

use crate::{
    connection::{Connection, Stats},
    stream::ReadOutcome,
};
use alloc::vec::Vec;
use bytes::Bytes;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use futures_channel::{mpsc, oneshot};
use futures_core::Stream;
use vesper_quic_core::{
    application,
    connection::Error,
    datagram::SendError,
    crypto::{tls, Provider},
    event::{Event, Subscriber},
    inet::{AddressPair, ExplicitCongestionNotification, SocketAddress},
    io::{AsyncClock, Socket},
    random,
    stream::{StreamId, StreamType},
    time::Clock,
    transport,
};

/// Bounds the work performed per driver turn
const MAX_RX_PER_TURN: usize = 10;
const MAX_TX_PER_TURN: usize = 10;

/// Per-stream buffered bytes before writes exert backpressure
const WRITE_BUFFER_LIMIT: u64 = 1024 * 1024;

enum Command {
    OpenStream {
        stream_type: StreamType,
        reply: oneshot::Sender<Result<StreamId, Error>>,
    },
    Write {
        id: StreamId,
        data: Bytes,
        fin: bool,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Read {
        id: StreamId,
        max: usize,
        reply: oneshot::Sender<Result<(Vec<u8>, bool), Error>>,
    },
    Reset {
        id: StreamId,
        error: application::Error,
    },
    StopSending {
        id: StreamId,
        error: application::Error,
    },
    SendDatagram {
        data: Bytes,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    RecvDatagram {
        reply: oneshot::Sender<Result<Bytes, Error>>,
    },
    Migrate {
        local: SocketAddress,
        reply: oneshot::Sender<Result<bool, Error>>,
    },
    Close {
        error: application::Error,
    },
    Stats {
        reply: oneshot::Sender<Stats>,
    },
}

/// A cloneable handle to a running connection
#[derive(Clone)]
pub struct Handle {
    commands: mpsc::UnboundedSender<Command>,
}

/// The stream of connection events; also yields the terminal
/// ConnectionClosed event
pub type Events = mpsc::UnboundedReceiver<Event>;

impl Handle {
    fn request<V>(
        &self,
        build: impl FnOnce(oneshot::Sender<V>) -> Command,
    ) -> impl Future<Output = Result<V, Error>> {
        let (reply, response) = oneshot::channel();
        let sent = self.commands.unbounded_send(build(reply)).is_ok();
        async move {
            if !sent {
                return Err(Error::Detached);
            }
            response.await.map_err(|_| Error::Detached)
        }
    }

    pub async fn open_stream(&self, stream_type: StreamType) -> Result<StreamId, Error> {
        self.request(|reply| Command::OpenStream { stream_type, reply })
            .await?
    }

    /// Writes bytes to a stream, suspending on backpressure
    pub async fn write(&self, id: StreamId, data: Bytes, fin: bool) -> Result<(), Error> {
        self.request(|reply| Command::Write {
            id,
            data,
            fin,
            reply,
        })
        .await?
    }

    /// Reads up to `max` contiguous bytes, suspending until available.
    /// The `bool` marks the end of the stream.
    pub async fn read(&self, id: StreamId, max: usize) -> Result<(Vec<u8>, bool), Error> {
        self.request(|reply| Command::Read { id, max, reply }).await?
    }

    pub fn reset(&self, id: StreamId, error: application::Error) {
        let _ = self.commands.unbounded_send(Command::Reset { id, error });
    }

    pub fn stop_sending(&self, id: StreamId, error: application::Error) {
        let _ = self
            .commands
            .unbounded_send(Command::StopSending { id, error });
    }

    pub async fn send_datagram(&self, data: Bytes) -> Result<(), Error> {
        self.request(|reply| Command::SendDatagram { data, reply })
            .await?
    }

    /// Receives the next unreliable datagram, suspending until one
    /// arrives
    pub async fn recv_datagram(&self) -> Result<Bytes, Error> {
        self.request(|reply| Command::RecvDatagram { reply }).await?
    }

    /// Migrates to a new local address; resolves true once the new path
    /// is validated
    pub async fn migrate(&self, local: SocketAddress) -> Result<bool, Error> {
        self.request(|reply| Command::Migrate { local, reply })
            .await?
    }

    pub fn close(&self, error: application::Error) {
        let _ = self.commands.unbounded_send(Command::Close { error });
    }

    pub async fn stats(&self) -> Result<Stats, Error> {
        self.request(|reply| Command::Stats { reply }).await
    }
}

/// A read waiting for stream data
struct ParkedRead {
    id: StreamId,
    max: usize,
    reply: oneshot::Sender<Result<(Vec<u8>, bool), Error>>,
}

/// A write waiting for buffer capacity
struct ParkedWrite {
    id: StreamId,
    data: Bytes,
    fin: bool,
    reply: oneshot::Sender<Result<(), Error>>,
}

/// A migration waiting for path validation
struct ParkedMigration {
    path_id: vesper_quic_core::path::Id,
    reply: oneshot::Sender<Result<bool, Error>>,
}

/// The single-task event loop driving one connection.
///
/// The driver is a plain `Future`; it completes once the connection is
/// fully closed and every parked operation has been resolved.
pub struct Driver<P, T, R, S, K, C>
where
    P: Provider,
    T: tls::Session,
    R: random::Generator,
    S: Subscriber,
    K: Socket,
    C: AsyncClock,
{
    connection: Connection<P, T, R, S>,
    socket: K,
    clock: C,

    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<Event>,

    parked_reads: Vec<ParkedRead>,
    parked_writes: Vec<ParkedWrite>,
    parked_datagram_reads: Vec<oneshot::Sender<Result<Bytes, Error>>>,
    parked_migrations: Vec<ParkedMigration>,

    rx_buffer: Vec<u8>,
    tx_buffer: Vec<u8>,
    /// A built datagram waiting for socket writability
    pending_tx: Option<(usize, AddressPair)>,
}

/// Creates the handle/event/driver triple for a connected state machine
pub fn spawn<P, T, R, S, K, C>(
    connection: Connection<P, T, R, S>,
    socket: K,
    clock: C,
) -> (Handle, Events, Driver<P, T, R, S, K, C>)
where
    P: Provider,
    T: tls::Session,
    R: random::Generator,
    S: Subscriber,
    K: Socket,
    C: AsyncClock,
{
    let (command_tx, command_rx) = mpsc::unbounded();
    let (event_tx, event_rx) = mpsc::unbounded();

    let driver = Driver {
        connection,
        socket,
        clock,
        commands: command_rx,
        events: event_tx,
        parked_reads: Vec::new(),
        parked_writes: Vec::new(),
        parked_datagram_reads: Vec::new(),
        parked_migrations: Vec::new(),
        rx_buffer: alloc::vec![0u8; 65535],
        tx_buffer: alloc::vec![0u8; 65535],
        pending_tx: None,
    };

    (
        Handle {
            commands: command_tx,
        },
        event_rx,
        driver,
    )
}

impl<P, T, R, S, K, C> Driver<P, T, R, S, K, C>
where
    P: Provider,
    T: tls::Session,
    R: random::Generator,
    S: Subscriber,
    K: Socket,
    C: AsyncClock,
{
    fn connection_error(&self) -> Error {
        match self.connection.state() {
            crate::connection::State::Closed { error } => error.clone(),
            _ => Error::Detached,
        }
    }

    fn handle_command(&mut self, command: Command) {
        let now = self.clock.get_time();
        match command {
            Command::OpenStream { stream_type, reply } => {
                use crate::stream::manager::OpenError;
                let result = match self.connection.open_stream(stream_type) {
                    Ok(id) => Ok(id),
                    Err(OpenError::NotReady) | Err(OpenError::LimitReached) => {
                        // limit updates arrive with peer frames; treat as a
                        // transient condition surfaced to the caller
                        Err(Error::Transport(
                            transport::Error::STREAM_LIMIT_ERROR
                                .with_reason("stream limit exhausted"),
                        ))
                    }
                };
                let _ = reply.send(result);
            }
            Command::Write {
                id,
                data,
                fin,
                reply,
            } => self.try_write(ParkedWrite {
                id,
                data,
                fin,
                reply,
            }),
            Command::Read { id, max, reply } => self.try_read(ParkedRead { id, max, reply }),
            Command::Reset { id, error } => {
                let _ = self.connection.stream_reset(id, error);
            }
            Command::StopSending { id, error } => {
                let _ = self.connection.stream_stop_sending(id, error);
            }
            Command::SendDatagram { data, reply } => {
                let result = self.connection.send_datagram(data).map_err(|error| match error {
                    SendError::NotSupported => Error::Io("peer does not accept datagrams"),
                    SendError::TooLarge => Error::Io("datagram exceeds the negotiated size"),
                });
                let _ = reply.send(result);
            }
            Command::RecvDatagram { reply } => match self.connection.recv_datagram() {
                Some(data) => {
                    let _ = reply.send(Ok(data));
                }
                None => self.parked_datagram_reads.push(reply),
            },
            Command::Migrate { local, reply } => match self.connection.migrate(local, now) {
                Ok(path_id) => self.parked_migrations.push(ParkedMigration { path_id, reply }),
                Err(error) => {
                    let _ = reply.send(Err(Error::Transport(error)));
                }
            },
            Command::Close { error } => self.connection.close(error, now),
            Command::Stats { reply } => {
                let _ = reply.send(self.connection.stats());
            }
        }
    }

    fn try_write(&mut self, write: ParkedWrite) {
        if self.connection.state().is_closed() {
            let _ = write.reply.send(Err(self.connection_error()));
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.2
        //# An endpoint could ... delay the sending of data to limit the
        //# memory committed to a stream
        if self.connection.streams.buffered_len(write.id) >= WRITE_BUFFER_LIMIT {
            self.parked_writes.push(write);
            return;
        }

        let result = self
            .connection
            .stream_write(write.id, write.data, write.fin)
            .map_err(Error::Transport);
        let _ = write.reply.send(result);
    }

    fn try_read(&mut self, read: ParkedRead) {
        if self.connection.state().is_closed() {
            let _ = read.reply.send(Err(self.connection_error()));
            return;
        }

        match self.connection.stream_read(read.id, read.max) {
            Ok(ReadOutcome::Data { data, fin }) => {
                let _ = read.reply.send(Ok((data, fin)));
            }
            Ok(ReadOutcome::Reset(error)) => {
                let _ = read.reply.send(Err(Error::Application {
                    error,
                    initiator: vesper_quic_core::endpoint::Type::Server,
                }));
            }
            Ok(ReadOutcome::Blocked) => self.parked_reads.push(read),
            Err(error) => {
                let _ = read.reply.send(Err(Error::Transport(error)));
            }
        }
    }

    /// Re-examines parked operations after connection progress
    fn resolve_parked(&mut self) {
        let closed = self.connection.state().is_closed();

        let reads = core::mem::take(&mut self.parked_reads);
        for read in reads {
            if closed {
                let _ = read.reply.send(Err(self.connection_error()));
            } else if self.connection.is_readable(read.id) {
                self.try_read(read);
            } else {
                self.parked_reads.push(read);
            }
        }

        let writes = core::mem::take(&mut self.parked_writes);
        for write in writes {
            if closed {
                let _ = write.reply.send(Err(self.connection_error()));
            } else {
                self.try_write(write);
            }
        }

        if !self.parked_datagram_reads.is_empty() {
            let readers = core::mem::take(&mut self.parked_datagram_reads);
            for reply in readers {
                if closed {
                    let _ = reply.send(Err(self.connection_error()));
                } else {
                    match self.connection.recv_datagram() {
                        Some(data) => {
                            let _ = reply.send(Ok(data));
                        }
                        None => self.parked_datagram_reads.push(reply),
                    }
                }
            }
        }

        let migrations = core::mem::take(&mut self.parked_migrations);
        for migration in migrations {
            let path = self.connection.paths.get(migration.path_id);
            match path {
                Some(path) if path.is_validated() => {
                    let _ = migration.reply.send(Ok(true));
                }
                Some(path) if path.challenge.is_abandoned() => {
                    let _ = migration.reply.send(Ok(false));
                }
                Some(_) if !closed => self.parked_migrations.push(migration),
                _ => {
                    let _ = migration.reply.send(Ok(false));
                }
            }
        }
    }

    fn forward_events(&mut self) {
        while let Some(event) = self.connection.poll_event() {
            let _ = self.events.unbounded_send(event);
        }
    }
}


impl<P, T, R, S, K, C> Future for Driver<P, T, R, S, K, C>
where
    P: Provider,
    T: tls::Session,
    R: random::Generator,
    S: Subscriber,
    K: Socket,
    C: AsyncClock,
    Self: Unpin,
{
    type Output = Error;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            let mut progressed = false;
            let now = this.clock.get_time();

            // application commands
            while let Poll::Ready(Some(command)) = Pin::new(&mut this.commands).poll_next(cx) {
                this.handle_command(command);
                progressed = true;
            }

            // incoming datagrams, bounded per turn
            for _ in 0..MAX_RX_PER_TURN {
                let mut buffer = core::mem::take(&mut this.rx_buffer);
                let result = this.socket.poll_recv(cx, &mut buffer);
                match result {
                    Poll::Ready(Ok(meta)) => {
                        this.connection.on_datagram(
                            &mut buffer[..meta.len],
                            meta.addresses,
                            meta.ecn,
                            now,
                        );
                        this.rx_buffer = buffer;
                        progressed = true;
                    }
                    Poll::Ready(Err(_)) => {
                        this.rx_buffer = buffer;
                        this.connection.close(application::Error::UNKNOWN, now);
                        progressed = true;
                        break;
                    }
                    Poll::Pending => {
                        this.rx_buffer = buffer;
                        break;
                    }
                }
            }

            // timers
            if let Some(deadline) = this.connection.next_expiration() {
                if this.clock.poll_at(cx, deadline).is_ready() {
                    this.connection.on_timeout(this.clock.get_time());
                    progressed = true;
                }
            }

            // outgoing datagrams, bounded per turn
            for _ in 0..MAX_TX_PER_TURN {
                let (len, addresses) = match this.pending_tx.take() {
                    Some(pending) => pending,
                    None => {
                        let mut buffer = core::mem::take(&mut this.tx_buffer);
                        let built = this.connection.transmit(&mut buffer, this.clock.get_time());
                        this.tx_buffer = buffer;
                        match built {
                            Some(result) => result,
                            None => break,
                        }
                    }
                };

                let ecn = ExplicitCongestionNotification::Ect0;
                let payload = &this.tx_buffer[..len];
                match this.socket.poll_send(cx, &addresses, ecn, payload) {
                    Poll::Ready(Ok(_)) => {
                        progressed = true;
                    }
                    Poll::Ready(Err(_)) => {
                        // transient socket errors drop the datagram; loss
                        // recovery covers the gap
                        progressed = true;
                    }
                    Poll::Pending => {
                        this.pending_tx = Some((len, addresses));
                        break;
                    }
                }
            }

            this.resolve_parked();
            this.forward_events();

            if this.connection.state().is_closed() {
                return Poll::Ready(this.connection_error());
            }

            if !progressed {
                return Poll::Pending;
            }
        }
    }
}
