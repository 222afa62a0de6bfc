use anyhow::{anyhow, Result};
use std::{
    io::Read,
    time::{Duration, Instant},
};

use serialport::SerialPort;

use crate::wire::{classify_line, ResponseLine};

/// How long `send_command` waits for an `OK`/`ERR` line before giving up.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Read timeout on the serial handle itself. Short so the response poll loop
/// can keep checking its own deadline.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settle delay after opening a port, some USB-serial adapters drop the first
/// bytes written immediately after open.
const OPEN_SETTLE: Duration = Duration::from_millis(100);

const READ_BUF_SIZE: usize = 256;

/// Line-oriented command/response link to a DUT.
///
/// The execution engine only talks through this trait, so tests can substitute
/// a scripted stub for real hardware.
pub trait CommandLink: Send {
    /// Open the link. Reopening with the same parameters while already open
    /// must be a cheap no-op so consecutive runs can share the connection.
    fn open(&mut self, port: &str, baud: u32) -> Result<()>;

    /// Send one command line and wait for the first `OK`/`ERR` reply,
    /// discarding heartbeat/debug noise. Failures are data, not errors:
    /// the bool carries success, the string carries the response or a
    /// human-readable reason.
    fn send_command(&mut self, command: &str) -> (bool, String);

    fn close(&mut self);
}

/// `CommandLink` over a real serial port (8N1, newline-terminated ASCII).
pub struct UartTransport {
    connection: Option<Box<dyn SerialPort>>,
    port: String,
    baud: u32,
    response_timeout: Duration,
}

impl UartTransport {
    pub fn new() -> Self {
        Self {
            connection: None,
            port: String::new(),
            baud: 0,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }

    /// Override the response timeout. Mainly for bench scripts talking to
    /// slow bootloaders.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Enumerate serial ports as `(device, description)` pairs.
    pub fn list_ports() -> Vec<(String, String)> {
        match serialport::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|p| {
                    let desc = match p.port_type {
                        serialport::SerialPortType::UsbPort(usb) => {
                            usb.product.unwrap_or_else(|| "USB serial".to_string())
                        }
                        serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                        serialport::SerialPortType::PciPort => "PCI".to_string(),
                        serialport::SerialPortType::Unknown => "Unknown".to_string(),
                    };
                    (p.port_name, desc)
                })
                .collect(),
            Err(err) => {
                log::warn!("Failed to enumerate serial ports: {err}");
                Vec::new()
            }
        }
    }
}

impl Default for UartTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandLink for UartTransport {
    fn open(&mut self, port: &str, baud: u32) -> Result<()> {
        if self.is_open() {
            if self.port == port && self.baud == baud {
                return Ok(());
            }
            // Port or baud changed, release the old handle first.
            self.close();
        }

        let handle = serialport::new(port, baud)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .open()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))?;

        std::thread::sleep(OPEN_SETTLE);

        self.connection = Some(handle);
        self.port = port.to_string();
        self.baud = baud;
        log::info!("Opened UART {port} at {baud} baud");
        Ok(())
    }

    fn send_command(&mut self, command: &str) -> (bool, String) {
        let timeout = self.response_timeout;
        let Some(conn) = self.connection.as_mut() else {
            return (false, "UART not open".to_string());
        };

        // Flush stale input (heartbeats etc.) so the poll below only sees
        // output produced after this command.
        if let Err(err) = conn.clear(serialport::ClearBuffer::Input) {
            log::warn!("Failed to clear input buffer: {err}");
        }

        log::debug!("UART send: {command}");
        let framed = format!("{command}\n");
        if let Err(err) = std::io::Write::write_all(conn, framed.as_bytes()) {
            return (false, format!("Write failed: {err}"));
        }
        if let Err(err) = std::io::Write::flush(conn) {
            return (false, format!("Write failed: {err}"));
        }

        poll_response(conn, timeout)
    }

    fn close(&mut self) {
        if self.connection.take().is_some() {
            log::info!("Closed UART {}", self.port);
        }
        self.port.clear();
        self.baud = 0;
    }
}

/// Poll `reader` for up to `timeout`, assembling newline-terminated lines and
/// dispatching on the first `OK`/`ERR` one. Noise lines and partial reads are
/// skipped. Factored out of `UartTransport` so the framing is testable with a
/// plain `io::Read`.
pub fn poll_response<R: Read + ?Sized>(reader: &mut R, timeout: Duration) -> (bool, String) {
    let deadline = Instant::now() + timeout;
    let mut pending: Vec<u8> = Vec::with_capacity(READ_BUF_SIZE);

    while Instant::now() < deadline {
        let mut buf = [0u8; READ_BUF_SIZE];
        match reader.read(&mut buf) {
            Ok(n) if n > 0 => {
                pending.extend_from_slice(&buf[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();
                    match classify_line(line) {
                        ResponseLine::Ok(text) => return (true, text.to_string()),
                        ResponseLine::Err(text) => return (false, text.to_string()),
                        ResponseLine::Noise => log::trace!("UART noise: {line}"),
                        ResponseLine::Other => {}
                    }
                }
            }
            Ok(_) => std::thread::sleep(POLL_INTERVAL),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                std::thread::sleep(POLL_INTERVAL)
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return (false, format!("Read failed: {err}")),
        }
    }

    (false, "Timeout waiting for response".to_string())
}
