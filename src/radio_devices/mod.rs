//! Transceiver backends
//!
//! This module contains the hardware backends the transport driver can run on.
//! All of them implement the same [`Transceiver`] capability set, and the backend is
//! chosen when the driver is constructed:
//!
//! - `bus`: register-level transceiver on a chip-select gated SPI bus (CC2420 compatible
//!   command set) with frame-boundary (SFD) and frame-pending (FIFOP) input pins
//! - `serial`: bit-banged transceiver bridged over a UART, speaking a hex line protocol
//! - `simulated`: in-memory loopback with fault injection, for hosts and tests

pub mod bus;
pub mod serial;
pub mod simulated;

pub use bus::BusTransceiver;
pub use serial::{SerialConfig, SerialLink, SerialReceiver, SerialTransceiver, serial_rx_pump};
pub use simulated::SimulatedTransceiver;

use embassy_time::Duration;

use crate::{RadioParam, RadioValue};

/// Single-byte commands that change the transceiver state without data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strobe {
    /// Receiver and transmitter off
    Off,
    /// Start transmitting the staged frame
    TxOn,
    /// Enable the receiver
    RxOn,
    /// Discard the outbound frame
    FlushTx,
    /// Discard the inbound frame
    FlushRx,
}

/// Backend failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverError {
    /// SPI transaction failed
    Bus,
    /// Reading a status pin failed
    Pin,
    /// Writing to the serial link failed
    Serial,
    /// The backend has no way to perform the request
    NotSupported,
}

impl core::fmt::Display for TransceiverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransceiverError::Bus => write!(f, "bus transaction failed"),
            TransceiverError::Pin => write!(f, "status pin read failed"),
            TransceiverError::Serial => write!(f, "serial link write failed"),
            TransceiverError::NotSupported => write!(f, "operation not supported by transceiver"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransceiverError {}

/// Capability set of a transceiver backend
///
/// The transport driver sequences these primitives; backends only move bytes and
/// report signal levels. Exactly one outbound frame is staged at a time.
pub trait Transceiver {
    /// Issues a command strobe
    fn strobe(&mut self, command: Strobe) -> Result<(), TransceiverError>;

    /// Stages `payload` as the outbound frame, replacing whatever was staged before
    ///
    /// The backend is responsible for any length prefix and trailer placeholder its
    /// wire format needs.
    fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransceiverError>;

    /// Streams bytes out of the inbound FIFO into `buffer`
    fn read_rx_fifo(&mut self, buffer: &mut [u8]) -> Result<(), TransceiverError>;

    /// Frame-boundary signal: asserted while a frame is on the medium
    fn frame_boundary(&mut self) -> bool;

    /// Frame-pending signal: a complete frame waits in the inbound FIFO
    fn frame_pending(&mut self) -> bool;

    /// Clear-channel assessment
    fn clear_channel(&mut self) -> bool;

    /// Polled after `Strobe::TxOn` until the transmission is seen starting
    fn transmission_started(&mut self) -> bool {
        self.frame_boundary()
    }

    /// Polled after the start was seen until the transmission is over
    fn transmission_ended(&mut self) -> bool {
        !self.frame_boundary()
    }

    /// Upper bound for the transmission of a `frame_len` byte payload
    fn transmission_timeout(&self, frame_len: usize) -> Duration;

    fn get_value(&mut self, _param: RadioParam) -> Result<RadioValue, TransceiverError> {
        Err(TransceiverError::NotSupported)
    }

    fn set_value(&mut self, _param: RadioParam, _value: RadioValue) -> Result<(), TransceiverError> {
        Err(TransceiverError::NotSupported)
    }
}
