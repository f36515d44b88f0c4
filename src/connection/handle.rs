//! Shared connection handle
//!
//! A [`Connection`] wraps one accepted (or connected) TCP stream. Clones
//! share the same socket, so the server, a client worker, a broadcast and
//! the application can all hold it at once. Closing from any clone wakes
//! every pending read, peek or write on every other clone.

use std::future::Future;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use super::state::ConnectionState;

/// Result of a non-destructive one-byte peek
#[derive(Debug)]
pub enum PeekOutcome {
    /// At least one byte is waiting to be read
    Data,
    /// The peer finished sending (orderly EOF)
    PeerClosed,
    /// The stream broke (reset, aborted, ...)
    Reset(io::Error),
    /// The connection was closed on this side while waiting
    LocallyClosed,
}

struct Inner {
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: watch::Sender<ConnectionState>,
    /// Serializes whole-buffer writes from different tasks
    write_lock: Mutex<()>,
}

/// Cloneable handle to a single TCP byte stream
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        Ok(Self::with_peer_addr(stream, peer_addr))
    }

    /// Wrap a connected stream whose peer address is already known
    pub fn with_peer_addr(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let (state, _) = watch::channel(ConnectionState::Open);

        Self {
            inner: Arc::new(Inner {
                stream,
                peer_addr,
                state,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.stream.local_addr()
    }

    /// Current ownership state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Still managed by the server
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Shut down, no further I/O possible
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Whether two handles refer to the same socket
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Close the connection
    ///
    /// Shuts the socket down in both directions, so the peer sees EOF even
    /// while other clones are alive, and wakes every pending operation on
    /// this connection. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if !self.transition(ConnectionState::Closed) {
            return false;
        }

        if let Err(e) = SockRef::from(&self.inner.stream).shutdown(Shutdown::Both) {
            // The peer may have reset the stream already
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::debug!(peer = %self.inner.peer_addr, error = %e, "Socket shutdown failed");
            }
        }

        true
    }

    /// Release the connection from server management without closing it
    ///
    /// Whoever keeps a clone now owns the socket; it is released when the
    /// last clone is dropped. Returns `false` unless the connection was open.
    pub fn detach(&self) -> bool {
        self.transition(ConnectionState::Detached)
    }

    /// Detach once no server-side send is in progress
    ///
    /// Waits for the per-connection write lock, so a broadcast write that
    /// already started finishes before ownership moves, and every later
    /// [`send_managed`](Self::send_managed) sees the detached state.
    /// Returns `false` unless the connection was open.
    pub async fn detach_after_writes(&self) -> bool {
        self.until_closed(async {
            let _guard = self.inner.write_lock.lock().await;
            Ok(self.detach())
        })
        .await
        .unwrap_or(false)
    }

    fn transition(&self, next: ConnectionState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Run `fut` unless the connection is, or becomes, closed
    async fn until_closed<T, F>(&self, fut: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = wait_closed(self.inner.state.subscribe()) => Err(not_connected()),
            result = fut => result,
        }
    }

    /// Wait until data is available or the stream ends, without consuming
    pub async fn peek(&self) -> PeekOutcome {
        let mut byte = [0u8; 1];
        let result = self.until_closed(self.inner.stream.peek(&mut byte)).await;

        if self.is_closed() {
            return PeekOutcome::LocallyClosed;
        }

        match result {
            Ok(0) => PeekOutcome::PeerClosed,
            Ok(_) => PeekOutcome::Data,
            Err(e) => PeekOutcome::Reset(e),
        }
    }

    /// Receive into `buf`, returning the number of bytes read (0 on EOF)
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = &self.inner.stream;

        self.until_closed(async move {
            loop {
                stream.readable().await?;
                match stream.try_read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await
    }

    /// Receive up to `max` bytes
    ///
    /// End of stream or a receive error closes the connection; EOF is
    /// reported as an empty buffer.
    pub async fn read_bytes(&self, max: usize) -> io::Result<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = BytesMut::zeroed(max);
        match self.read(&mut buf).await {
            Ok(0) => {
                self.close();
                Ok(Bytes::new())
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf.freeze())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Receive up to `max` bytes as text (invalid UTF-8 is replaced)
    pub async fn read_string(&self, max: usize) -> io::Result<String> {
        let bytes = self.read_bytes(max).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send the whole buffer
    ///
    /// Writes from different clones never interleave. A failed send closes
    /// the connection.
    pub async fn send(&self, data: &[u8]) -> io::Result<()> {
        let result = self
            .until_closed(async {
                let _guard = self.inner.write_lock.lock().await;
                self.write_all(data).await
            })
            .await;

        if let Err(ref e) = result {
            if self.close() {
                tracing::debug!(peer = %self.inner.peer_addr, error = %e, "Send failed, connection closed");
            }
        }

        result
    }

    /// Send a UTF-8 string
    pub async fn send_text(&self, text: &str) -> io::Result<()> {
        self.send(text.as_bytes()).await
    }

    /// Send the whole buffer, closing the connection if it takes longer than `limit`
    pub async fn send_timeout(&self, data: &[u8], limit: Duration) -> io::Result<()> {
        match tokio::time::timeout(limit, self.send(data)).await {
            Ok(result) => result,
            Err(_) => {
                self.close();
                Err(io::Error::new(io::ErrorKind::TimedOut, "send timed out"))
            }
        }
    }

    /// Send the whole buffer if the server still manages the connection
    ///
    /// Returns `Ok(false)` without writing anything once the connection is
    /// detached. `limit` bounds the whole send, waiting for the write lock
    /// included. A failed or timed-out send closes a connection that is
    /// still open; a detached one is left to its owner.
    pub async fn send_managed(&self, data: &[u8], limit: Option<Duration>) -> io::Result<bool> {
        let write = self.until_closed(async {
            let _guard = self.inner.write_lock.lock().await;
            if !self.is_open() {
                return Ok(false);
            }
            self.write_all(data).await.map(|()| true)
        });

        let result = match limit {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "send timed out"))),
            None => write.await,
        };

        if let Err(ref e) = result {
            if self.is_open() && self.close() {
                tracing::debug!(peer = %self.inner.peer_addr, error = %e, "Send failed, connection closed");
            }
        }

        result
    }

    async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        let stream = &self.inner.stream;

        while !data.is_empty() {
            stream.writable().await?;
            match stream.try_write(data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

async fn wait_closed(mut state: watch::Receiver<ConnectionState>) {
    loop {
        if *state.borrow_and_update() == ConnectionState::Closed {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}
