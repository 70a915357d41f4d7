//! Transport abstraction contract (§6): the client and server engines
//! are generic over anything implementing [`Transport`], so the same
//! retry/timeout/dispatch logic runs over TCP, RTU serial, or an
//! in-memory pair used in tests.

use std::io;
use std::time::{Duration, Instant};

/// How a transport delivers bytes: stream transports (TCP, serial)
/// guarantee ordered, reassemble-able delivery; datagram transports
/// (UDP) deliver whole messages or nothing, and can silently drop one.
///
/// This distinction drives the client engine's retry policy (§4.3):
/// stream transports default to a single try per request, datagram
/// transports default to retrying a handful of times.
pub trait Transport: Send {
    /// Establish the underlying connection, if not already established.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on failure to connect.
    fn connect(&mut self) -> io::Result<()>;

    /// Tear down the connection. Idempotent.
    fn disconnect(&mut self);

    /// Whether the transport currently believes it is connected.
    fn is_connected(&self) -> bool;

    /// Whether this transport delivers whole messages rather than a
    /// byte stream (UDP: yes; TCP/serial: no).
    fn is_datagram(&self) -> bool;

    /// Write the entire buffer, blocking until done or failed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the caller should treat any
    /// error here as connection-ending.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever bytes are available into `buf`, blocking at most
    /// until `deadline`. Returns the number of bytes read; `0` means
    /// the deadline passed with nothing received (stream transports)
    /// or the peer closed the connection.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the caller should treat any
    /// error here as connection-ending.
    fn read_some(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize>;

    /// Discard any bytes already buffered but not yet consumed, for up
    /// to `duration` — used before a retry so a late response to a
    /// previous attempt cannot be mistaken for the current one.
    fn flush(&mut self, duration: Duration);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> io::Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect();
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn is_datagram(&self) -> bool {
        (**self).is_datagram()
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn read_some(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        (**self).read_some(buf, deadline)
    }

    fn flush(&mut self, duration: Duration) {
        (**self).flush(duration);
    }
}

#[cfg(feature = "simulated")]
pub mod simulated;

#[cfg(feature = "simulated")]
pub use simulated::{duplex_pair, SimulatedTransport};
