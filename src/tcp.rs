use crate::protocol::*;
use crate::{Error, FrameError, Reading};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One serial-over-TCP link. All parallel units of a cluster answer on the
/// same link, addressed by unit id in the query.
#[derive(Debug)]
pub struct Inverter {
    stream: TcpStream,
    last_execution: Option<Instant>,
    delay: Duration,
}

impl Inverter {
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self> {
        let mut last_error = None;
        for addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    log::debug!("Connected to {addr}");
                    let mut inverter = Self {
                        stream,
                        last_execution: None,
                        delay: MINIMUM_DELAY,
                    };
                    inverter.set_timeout(timeout)?;
                    return Ok(inverter);
                }
                Err(err) => {
                    log::debug!("Cannot connect to {addr}: {err}");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "no address to connect to"))
            .into())
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    /// Minimum idle time between the end of one reply and the next query.
    pub fn set_delay(&mut self, delay: Duration) {
        if delay < MINIMUM_DELAY {
            log::warn!("delay {delay:?} lower minimum {MINIMUM_DELAY:?}, use minimum");
        }
        self.delay = Duration::max(delay, MINIMUM_DELAY);
    }

    fn await_delay(&self) {
        if let Some(last_execution) = self.last_execution {
            if let Some(remaining) = self.delay.checked_sub(last_execution.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }

    // Stale bytes from an earlier timed-out reply would otherwise be read as
    // the start of the next one.
    fn drain_pending(&mut self) -> Result<()> {
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 256];
        let drained = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => log::trace!("Discarded {n} pending bytes"),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };
        self.stream.set_nonblocking(false)?;
        Ok(drained?)
    }

    fn send_bytes(&mut self, tx_buffer: &[u8]) -> Result<()> {
        self.drain_pending()?;
        self.await_delay();
        log::trace!("write bytes: {tx_buffer:02X?}");
        self.stream.write_all(tx_buffer)?;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = Vec::with_capacity(160);
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(FrameError::ConnectionClosed.into()),
                Ok(_) if byte[0] == TERMINATOR => break,
                Ok(_) if rx_buffer.len() >= MAX_FRAME_LENGTH => {
                    return Err(FrameError::TooLong(MAX_FRAME_LENGTH).into())
                }
                Ok(_) => rx_buffer.push(byte[0]),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(FrameError::Timeout.into())
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        log::trace!("receive_frame: {rx_buffer:02X?}");
        Ok(rx_buffer)
    }

    /// Sends a complete command and returns the reply without its CR.
    pub fn query_raw(&mut self, tx_buffer: &[u8]) -> Result<Vec<u8>> {
        self.send_bytes(tx_buffer)?;
        let reply = self.receive_frame();
        self.last_execution = Some(Instant::now());
        reply
    }

    pub fn get_parallel_status(&mut self, unit: u8) -> Result<Reading> {
        log::trace!("get parallel status of unit {unit}");
        let reply = self.query_raw(&QpgsQuery::request(unit))?;
        QpgsQuery::decode(&reply, &QpgsQuery::inverter_id(unit))
    }
}
