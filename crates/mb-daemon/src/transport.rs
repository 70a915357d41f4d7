//! Real [`Transport`] implementations: TCP and UDP sockets for MBAP,
//! and a serial line for RTU (§6 "Transport interface").

use mb_common::config::{RtuConfig, TcpConfig, TransportConfig, TransportKind};
use mb_transport::Transport;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Construct the transport named by `config`, ready to `connect()`.
///
/// # Errors
///
/// Returns an error if the configuration names a kind with no
/// matching parameter section, or if opening a serial port fails.
pub fn build_transport(config: &TransportConfig) -> anyhow::Result<Box<dyn Transport>> {
    match config.kind {
        TransportKind::Tcp => {
            let tcp = config
                .tcp
                .clone()
                .ok_or_else(|| anyhow::anyhow!("transport.kind = tcp but [transport.tcp] is missing"))?;
            if tcp.datagram {
                Ok(Box::new(UdpTransport::new(tcp)))
            } else {
                Ok(Box::new(TcpTransport::new(tcp)))
            }
        }
        TransportKind::Rtu => {
            let rtu = config
                .rtu
                .clone()
                .ok_or_else(|| anyhow::anyhow!("transport.kind = rtu but [transport.rtu] is missing"))?;
            Ok(Box::new(SerialTransport::new(rtu)))
        }
    }
}

/// Shrink `deadline` to a duration, clamped to at least 1ms so the
/// underlying socket never gets a zero read timeout (which on some
/// platforms means "block forever" rather than "don't block").
fn remaining(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_millis(1))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Modbus TCP/MBAP over a `TcpStream`.
pub struct TcpTransport {
    config: TcpConfig,
    addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            addr: None,
            stream: None,
        }
    }

    fn resolve(&mut self) -> io::Result<SocketAddr> {
        if let Some(addr) = self.addr {
            return Ok(addr);
        }
        let addr = self
            .config
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;
        self.addr = Some(addr);
        Ok(addr)
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> io::Result<()> {
        let addr = self.resolve()?;
        debug!(%addr, "connecting modbus tcp transport");
        let stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stream = None;
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn is_datagram(&self) -> bool {
        false
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        stream.write_all(bytes)
    }

    fn read_some(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        stream.set_read_timeout(Some(remaining(deadline)))?;
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => {
                self.stream = None;
                Err(e)
            }
        }
    }

    fn flush(&mut self, duration: Duration) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let deadline = Instant::now() + duration;
        let mut scratch = [0u8; 256];
        loop {
            if stream.set_read_timeout(Some(remaining(deadline))).is_err() {
                return;
            }
            match stream.read(&mut scratch) {
                Ok(0) | Err(_) => return,
                Ok(_) if Instant::now() >= deadline => return,
                Ok(_) => continue,
            }
        }
    }
}

/// Modbus TCP/MBAP over a connected `UdpSocket` (the `datagram = true` case).
pub struct UdpTransport {
    config: TcpConfig,
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            socket: None,
        }
    }
}

impl Transport for UdpTransport {
    fn connect(&mut self) -> io::Result<()> {
        let addr = self
            .config
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.socket = None;
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn is_datagram(&self) -> bool {
        true
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        socket.send(bytes)?;
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        socket.set_read_timeout(Some(remaining(deadline)))?;
        match socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self, duration: Duration) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let deadline = Instant::now() + duration;
        let mut scratch = [0u8; 256];
        while Instant::now() < deadline {
            if socket.set_read_timeout(Some(remaining(deadline))).is_err() {
                return;
            }
            match socket.recv(&mut scratch) {
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    }
}

fn parse_parity(value: &str) -> serialport::Parity {
    match value.to_ascii_lowercase().as_str() {
        "odd" => serialport::Parity::Odd,
        "even" => serialport::Parity::Even,
        _ => serialport::Parity::None,
    }
}

fn parse_stop_bits(value: u8) -> serialport::StopBits {
    if value >= 2 {
        serialport::StopBits::Two
    } else {
        serialport::StopBits::One
    }
}

fn parse_data_bits(value: u8) -> serialport::DataBits {
    match value {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

/// Modbus RTU over a serial line, via the `serialport` crate.
pub struct SerialTransport {
    config: RtuConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    #[must_use]
    pub fn new(config: RtuConfig) -> Self {
        Self { config, port: None }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> io::Result<()> {
        debug!(device = %self.config.device, baud = self.config.baud_rate, "opening serial transport");
        let port = serialport::new(self.config.device.as_str(), self.config.baud_rate)
            .data_bits(parse_data_bits(self.config.data_bits))
            .stop_bits(parse_stop_bits(self.config.stop_bits))
            .parity(parse_parity(&self.config.parity))
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.port = Some(port);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.port = None;
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn is_datagram(&self) -> bool {
        false
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        port.write_all(bytes)
    }

    fn read_some(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        if port.set_timeout(remaining(deadline)).is_err() {
            warn!("failed to adjust serial read timeout");
        }
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self, duration: Duration) {
        let Some(port) = self.port.as_mut() else {
            return;
        };
        let deadline = Instant::now() + duration;
        let mut scratch = [0u8; 256];
        while Instant::now() < deadline {
            if port.set_timeout(remaining(deadline)).is_err() {
                return;
            }
            match port.read(&mut scratch) {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_hits_zero() {
        let deadline = Instant::now() - Duration::from_secs(1);
        assert_eq!(remaining(deadline), Duration::from_millis(1));
    }

    #[test]
    fn parity_defaults_to_none_on_unknown_value() {
        assert!(matches!(parse_parity("garbled"), serialport::Parity::None));
        assert!(matches!(parse_parity("Even"), serialport::Parity::Even));
        assert!(matches!(parse_parity("odd"), serialport::Parity::Odd));
    }

    #[test]
    fn build_transport_requires_matching_section() {
        let config = TransportConfig {
            kind: TransportKind::Rtu,
            tcp: None,
            rtu: None,
        };
        assert!(build_transport(&config).is_err());
    }
}
