//! An in-memory duplex transport pair, for exercising the client and
//! server engines without real sockets.

use crate::Transport;
use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use tracing::trace;

/// One end of an in-memory duplex pipe. Construct a connected pair
/// with [`duplex_pair`].
pub struct SimulatedTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    scratch: VecDeque<u8>,
    connected: bool,
    datagram: bool,
    write_count: u32,
    fail_next_write: bool,
    drop_next_write: bool,
    drop_every: Option<u32>,
}

/// Build a pair of transports wired to each other: writes on one side
/// arrive as reads on the other. `datagram` selects whole-message
/// delivery semantics (true) or byte-stream reassembly (false).
#[must_use]
pub fn duplex_pair(datagram: bool) -> (SimulatedTransport, SimulatedTransport) {
    let (tx_a, rx_b) = mpsc::channel();
    let (tx_b, rx_a) = mpsc::channel();
    let make = |tx, rx| SimulatedTransport {
        tx,
        rx,
        scratch: VecDeque::new(),
        connected: true,
        datagram,
        write_count: 0,
        fail_next_write: false,
        drop_next_write: false,
        drop_every: None,
    };
    (make(tx_a, rx_a), make(tx_b, rx_b))
}

impl SimulatedTransport {
    /// Make the next `write_all` call fail, simulating a severed link.
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    /// Silently swallow every `n`th write (the bytes never reach the
    /// peer), simulating a datagram transport that occasionally drops
    /// a packet in flight. `n` must be at least 1.
    pub fn drop_every(&mut self, n: u32) {
        self.drop_every = Some(n.max(1));
        self.write_count = 0;
    }

    /// Silently swallow exactly the next write, simulating a single
    /// packet lost in flight. The call itself still reports success,
    /// since the write genuinely left the sender.
    pub fn drop_next_write(&mut self) {
        self.drop_next_write = true;
    }
}

impl Transport for SimulatedTransport {
    fn connect(&mut self) -> io::Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_datagram(&self) -> bool {
        self.datagram
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.connected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"));
        }
        if self.fail_next_write {
            self.fail_next_write = false;
            trace!("injecting write failure");
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure"));
        }
        if self.drop_next_write {
            self.drop_next_write = false;
            trace!(len = bytes.len(), "dropping write (drop_next_write)");
            return Ok(());
        }
        self.write_count += 1;
        if let Some(n) = self.drop_every {
            if self.write_count % n == 0 {
                trace!(len = bytes.len(), write_count = self.write_count, "dropping write (drop_every)");
                return Ok(());
            }
        }
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
    }

    fn read_some(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        if self.datagram {
            let timeout = deadline.saturating_duration_since(Instant::now());
            return match self.rx.recv_timeout(timeout) {
                Ok(msg) => {
                    let n = msg.len().min(buf.len());
                    buf[..n].copy_from_slice(&msg[..n]);
                    Ok(n)
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Ok(0),
            };
        }

        if self.scratch.is_empty() {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(timeout) {
                Ok(msg) => self.scratch.extend(msg),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.scratch.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.scratch.pop_front().unwrap();
        }
        Ok(n)
    }

    fn flush(&mut self, duration: Duration) {
        self.scratch.clear();
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(timeout) {
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }
}
