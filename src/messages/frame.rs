//! # Frame Module
//!
//! Fixed-capacity frame buffer shared by the transmit and receive paths.
//!
//! ## Architecture
//!
//! A `Frame` is the logical payload of one radio frame. On the wire (bus backend) it is
//! surrounded by a length byte and a 2-byte trailer:
//!
//! - Byte 0: Length (payload + trailer)
//! - Bytes 1..=n: Payload
//! - Last 2 bytes: Trailer (checksum appended by the transceiver, stripped on read)
//!
//! The trailer never appears in a `Frame`; `MAX_PAYLOAD_LEN` already accounts for it.
//!
//! ## Design Considerations
//!
//! - **Public Fields**: `data` and `length` are public so backends can fill the buffer in place
//! - **Fixed Size**: All frames have the same capacity for predictable memory usage

use crate::{MAX_PAYLOAD_LEN, RadioError};
use crate::timestamp_capture::Ticks;

/// Payload buffer of a single radio frame
///
/// # Public Fields
/// The `data` and `length` fields are public so that the delivery path can read
/// straight into the buffer without an intermediate copy.
///
/// # Example
/// ```rust
/// use backscatter_radio_lib::Frame;
///
/// let frame = Frame::from_payload(&[0x41, 0x42]).unwrap();
/// assert_eq!(frame.payload(), &[0x41, 0x42]);
/// ```
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "std"), derive(Debug))]
pub struct Frame {
    /// Raw payload buffer of fixed size
    pub data: [u8; MAX_PAYLOAD_LEN],

    /// Actual number of valid bytes in the data buffer
    pub length: usize,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// Creates an empty frame
    pub const fn new() -> Self {
        Frame {
            data: [0u8; MAX_PAYLOAD_LEN],
            length: 0,
        }
    }

    /// Builds a frame from a payload slice
    ///
    /// # Returns
    /// * `Ok(Frame)` holding a copy of `payload`
    /// * `Err(RadioError::FrameTooLong)` if the payload plus trailer exceeds the maximum frame size
    pub fn from_payload(payload: &[u8]) -> Result<Self, RadioError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RadioError::FrameTooLong(payload.len()));
        }
        let mut frame = Frame::new();
        frame.data[..payload.len()].copy_from_slice(payload);
        frame.length = payload.len();
        Ok(frame)
    }

    /// Returns the valid part of the payload buffer
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length.min(MAX_PAYLOAD_LEN)]
    }

    /// Clears the frame without touching the buffer contents
    pub fn clear(&mut self) {
        self.length = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// A frame handed to the upper layer together with its start-of-frame timestamp
///
/// The timestamp is the most recent rising-edge capture at the time the delivery
/// task woke up (bus backend) or the capture time of the terminating newline
/// (serial backend).
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "std"), derive(Debug))]
pub struct ReceivedFrame {
    pub frame: Frame,
    pub timestamp: Ticks,
}
