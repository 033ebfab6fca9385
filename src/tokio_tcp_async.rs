//! Provides an asynchronous client for polling Axpert/Voltronic parallel inverters
//! through a serial-over-TCP bridge, using Tokio.
//!
//! This module is suitable for applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use axpert_lib::tokio_tcp_async::Inverter;
//! use axpert_lib::{Error, SystemTotals};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut inverter = Inverter::connect("10.0.0.235:26").await?;
//!     inverter.set_timeout(Duration::from_secs(5));
//!     inverter.set_delay(Duration::from_secs(1));
//!
//!     let readings = vec![
//!         inverter.get_parallel_status(0).await?,
//!         inverter.get_parallel_status(1).await?,
//!     ];
//!     println!("{:?}", SystemTotals::aggregate(&readings));
//!     Ok(())
//! }
//! ```

use crate::protocol::*;
use crate::{Error, FrameError, Reading};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// A specialized `Result` type for operations within the `tokio_tcp_async` module.
type Result<T> = std::result::Result<T, Error>;

/// Asynchronous counterpart of [`crate::tcp::Inverter`].
///
/// Every I/O operation is bounded by the configured timeout. An elapsed
/// timeout while waiting for a reply is reported as [`FrameError::Timeout`].
#[derive(Debug)]
pub struct Inverter {
    stream: TcpStream,
    last_execution: Option<Instant>,
    io_timeout: Duration, // Timeout for individual I/O operations
    delay: Duration,      // Delay between queries
}

impl Inverter {
    /// Connects to the serial bridge at `addr`.
    ///
    /// The connection attempt is bounded by the default I/O timeout of five seconds.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let io_timeout = crate::tcp::DEFAULT_TIMEOUT;
        let stream = tokio::time::timeout(io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
        Ok(Self {
            stream,
            last_execution: None,
            io_timeout,
            delay: MINIMUM_DELAY,
        })
    }

    /// Sets the timeout for individual I/O operations (read/write).
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set timeout to {timeout:?}");
        self.io_timeout = timeout;
    }

    /// Sets the minimum delay between the end of one reply and the next query.
    ///
    /// If the provided `delay` is less than `MINIMUM_DELAY` from the `protocol` module,
    /// `MINIMUM_DELAY` will be used.
    pub fn set_delay(&mut self, delay: Duration) {
        if delay < MINIMUM_DELAY {
            log::warn!("delay {delay:?} lower minimum {MINIMUM_DELAY:?}, use minimum");
            self.delay = MINIMUM_DELAY;
        } else {
            self.delay = delay;
        }
        log::trace!("set delay to {:?}", self.delay);
    }

    async fn await_delay(&self) {
        if let Some(last_execution) = self.last_execution {
            if let Some(remaining) = self.delay.checked_sub(last_execution.elapsed()) {
                tokio::time::sleep(remaining).await;
            }
        }
    }

    /// Discards whatever a previous, timed-out reply left in the socket.
    fn drain_pending(&mut self) -> Result<()> {
        let mut buf = [0u8; 256];
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => log::trace!("{n} pending bytes consumed"),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn send_bytes(&mut self, tx_buffer: &[u8]) -> Result<()> {
        self.drain_pending()?;
        self.await_delay().await;
        log::trace!("write bytes: {tx_buffer:02X?}");
        tokio::time::timeout(self.io_timeout, self.stream.write_all(tx_buffer))
            .await
            .map_err(|_| FrameError::Timeout)??;
        Ok(())
    }

    async fn read_until_terminator(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = Vec::with_capacity(160);
        loop {
            let byte = match self.stream.read_u8().await {
                Ok(byte) => byte,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(FrameError::ConnectionClosed.into())
                }
                Err(err) => return Err(err.into()),
            };
            if byte == TERMINATOR {
                return Ok(rx_buffer);
            }
            if rx_buffer.len() >= MAX_FRAME_LENGTH {
                return Err(FrameError::TooLong(MAX_FRAME_LENGTH).into());
            }
            rx_buffer.push(byte);
        }
    }

    async fn receive_frame(&mut self) -> Result<Vec<u8>> {
        let rx_buffer = tokio::time::timeout(self.io_timeout, self.read_until_terminator())
            .await
            .map_err(|_| FrameError::Timeout)??;
        log::trace!("receive_frame: {rx_buffer:02X?}");
        Ok(rx_buffer)
    }

    /// Sends a complete command and returns the reply without its CR.
    pub async fn query_raw(&mut self, tx_buffer: &[u8]) -> Result<Vec<u8>> {
        self.send_bytes(tx_buffer).await?;
        let reply = self.receive_frame().await;
        self.last_execution = Some(Instant::now());
        reply
    }

    /// Queries and decodes the status of parallel unit `unit`.
    ///
    /// # Returns
    ///
    /// A `Result` containing the decoded [`Reading`] labelled `QPGS<unit>`, or an
    /// `Error` if the reply times out, has no start marker or carries too few fields.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use axpert_lib::tokio_tcp_async::Inverter;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), axpert_lib::Error> {
    /// # let mut inverter = Inverter::connect("10.0.0.235:26").await?;
    /// let reading = inverter.get_parallel_status(0).await?;
    /// println!("SOC: {}%, battery: {} A", reading.battery_soc, reading.battery_real_charge_current);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_parallel_status(&mut self, unit: u8) -> Result<Reading> {
        log::trace!("get parallel status of unit {unit}");
        let reply = self.query_raw(&QpgsQuery::request(unit)).await?;
        QpgsQuery::decode(&reply, &QpgsQuery::inverter_id(unit))
    }
}
