//! Serial Port Abstractions
//!
//! This module provides the byte-stream layer the transport session is built on.
//!
//! # Types
//!
//! - [`ByteStream`]: AsyncRead + AsyncWrite plus buffer discarding
//! - [`DynStream`]: Type-erased boxed stream
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking
//! - [`drain_serial_buffer`]: Drain stale data from a stream
//! - [`read_available`]: Collect whatever the device sends until it goes quiet
//!
//! # Example
//!
//! ```rust,ignore
//! use emf_daq::hardware::serial::{open_serial_async, read_available, ByteStream};
//! use tokio::io::AsyncWriteExt;
//!
//! let mut port = open_serial_async("/dev/gqemf390", 115200, Duration::from_secs(1)).await?;
//! port.discard_buffers()?;
//! port.write_all(b"<GETEMF>>").await?;
//! tokio::time::sleep(Duration::from_millis(100)).await;
//! let bytes = read_available(&mut port, Duration::from_millis(20), Duration::from_secs(1)).await?;
//! ```

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

// =============================================================================
// Stream Trait
// =============================================================================

/// Async byte stream connected to the instrument.
///
/// Implemented for:
/// - `tokio_serial::SerialStream` (real hardware, clears OS buffers)
/// - `tokio::io::DuplexStream` (testing)
///
/// Mocks implement it with the default no-op [`ByteStream::discard_buffers`].
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// Discard bytes waiting in the inbound and outbound buffers.
    fn discard_buffers(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Type-erased boxed stream.
pub type DynStream = Box<dyn ByteStream>;

impl ByteStream for tokio::io::DuplexStream {}

#[cfg(feature = "instrument_serial")]
impl ByteStream for tokio_serial::SerialStream {
    fn discard_buffers(&mut self) -> io::Result<()> {
        use tokio_serial::SerialPort;
        SerialPort::clear(&*self, tokio_serial::ClearBuffer::All).map_err(io::Error::from)
    }
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns the OS error if the port cannot be opened.
#[cfg(feature = "instrument_serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    timeout: Duration,
) -> io::Result<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    tokio::task::spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open_native_async()
            .map_err(io::Error::from)
    })
    .await
    .map_err(io::Error::other)?
}

/// Drain stale data from a stream.
///
/// Reads and discards until nothing arrives within `window`.
///
/// # Returns
///
/// Total number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + window;
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break, // Timeout, no more immediate data
        }
    }

    total_discarded
}

/// Collect the bytes the device sends, stopping once it has been silent for `idle_gap`.
///
/// `limit` bounds the whole read. An empty result means the device said nothing.
///
/// # Errors
///
/// Propagates I/O errors from the stream. EOF before any byte arrived is reported as
/// `UnexpectedEof`; EOF after data ends the read normally.
pub async fn read_available<R: AsyncRead + Unpin>(
    port: &mut R,
    idle_gap: Duration,
    limit: Duration,
) -> io::Result<Vec<u8>> {
    let mut collected = Vec::with_capacity(64);
    let mut buf = [0u8; 256];
    let deadline = tokio::time::Instant::now() + limit;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(idle_gap.min(remaining), port.read(&mut buf)).await {
            Ok(Ok(0)) if collected.is_empty() => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Unexpected EOF from serial port",
                ))
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
            Ok(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
            Ok(Err(e)) => return Err(e),
            Err(_) => break, // quiet for idle_gap
        }
    }

    Ok(collected)
}
