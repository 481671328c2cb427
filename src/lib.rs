//! # Backscatter Radio Library
//!
//! Transport driver for carrier-assisted backscatter sensor tags. The tag does not
//! generate its own carrier; it modulates a carrier supplied by a nearby generator and
//! reflects frames back into the medium.
//!
//! ## Architecture
//!
//! - [`radio_driver::RadioDriver`]: transport state machine (prepare, transmit, read,
//!   on/off) with a reentrant lock that defers on/off requests until the current
//!   operation finishes
//! - [`radio_devices`]: interchangeable transceiver backends (SPI register level, UART
//!   bridge, simulated loopback)
//! - [`timestamp_capture::TimestampCapture`]: interrupt-side record of frame-boundary
//!   edges, used to tag received frames with their start-of-frame time
//! - [`frame_delivery`]: task that moves received frames into the received frame queue
//! - [`slot_scheduler`]: periodic and beacon-synchronized transmission patterns
//!
//! [`RadioTransport::initialize`] resets the driver, spawns the frame delivery task and
//! hands out the receiving end of the received frame queue.
//!
//! ## Features
//!
//! - `std`: host build (Box-leaked queue, `arch-std` executor)
//! - `embedded`: target build (statically allocated queue)

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(all(feature = "std", feature = "embedded"))]
compile_error!("The std and embedded features are mutually exclusive");

pub mod energy;
pub mod frame_delivery;
pub mod messages;
pub mod radio_devices;
pub mod radio_driver;
pub mod radio_lock;
pub mod slot_scheduler;
pub mod timestamp_capture;

#[cfg(any(feature = "std", feature = "embedded"))]
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(feature = "embedded")]
use embassy_sync::channel::Channel;
#[cfg(any(feature = "std", feature = "embedded"))]
use log::{Level, log};

pub use frame_delivery::{FrameDelivery, RxEvent};
pub use messages::{Frame, ReceivedFrame};
pub use radio_devices::TransceiverError;
pub use radio_driver::{DriverMode, RadioDriver, SharedRadio, TransportConfig};
pub use timestamp_capture::TimestampCapture;

#[cfg(any(feature = "std", feature = "embedded"))]
use crate::energy::EnergyAccounting;
#[cfg(any(feature = "std", feature = "embedded"))]
use crate::radio_devices::Transceiver;
#[cfg(any(feature = "std", feature = "embedded"))]
use embassy_sync::blocking_mutex::raw::RawMutex;

/// Largest frame on the medium, trailer included
pub const MAX_FRAME_LEN: usize = 127;
/// Checksum/footer bytes appended by the transceiver
pub const TRAILER_LEN: usize = 2;
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - TRAILER_LEN;

/// Received frames buffered between the delivery task and the application
pub const RX_FRAME_QUEUE_SIZE: usize = 4;

pub type RxFrameQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, ReceivedFrame, RX_FRAME_QUEUE_SIZE>;
pub type RxFrameQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, ReceivedFrame, RX_FRAME_QUEUE_SIZE>;
pub type RxFrameQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, ReceivedFrame, RX_FRAME_QUEUE_SIZE>;

#[cfg(feature = "embedded")]
static RX_FRAME_QUEUE: RxFrameQueue = Channel::new();

/// Outcome of a transmission attempt that did not fail in the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Ok,
    /// The frame start was never observed; the medium was most likely busy
    Collision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Payload length that does not fit a frame
    FrameTooLong(usize),
    /// Declared length byte outside the valid range
    MalformedFrame(u8),
    /// Payload length that does not fit the caller's buffer
    BufferTooSmall(usize),
    Transceiver(TransceiverError),
    NotSupported,
    /// The shared driver is already borrowed
    Busy,
    TaskSpawnFailed,
}

impl core::fmt::Display for RadioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RadioError::FrameTooLong(len) => write!(f, "payload of {} bytes exceeds {} bytes", len, MAX_PAYLOAD_LEN),
            RadioError::MalformedFrame(len) => write!(f, "malformed frame with declared length {}", len),
            RadioError::BufferTooSmall(len) => write!(f, "buffer too small for {} byte payload", len),
            RadioError::Transceiver(err) => write!(f, "transceiver error: {}", err),
            RadioError::NotSupported => write!(f, "not supported"),
            RadioError::Busy => write!(f, "radio busy"),
            RadioError::TaskSpawnFailed => write!(f, "failed to spawn task"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RadioError {}

impl From<TransceiverError> for RadioError {
    fn from(err: TransceiverError) -> Self {
        match err {
            TransceiverError::NotSupported => RadioError::NotSupported,
            other => RadioError::Transceiver(other),
        }
    }
}

/// Out-of-band radio parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioParam {
    Channel,
    TxPower,
    LastRssi,
    PanId,
    ShortAddress,
}

pub type RadioValue = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveFrameError {
    NotInited,
}

enum RadioTransportState {
    Uninitialized,
    Initialized { rx_frame_queue_receiver: RxFrameQueueReceiver },
}

/// Entry point of the library: owns the receiving end of the received frame queue
pub struct RadioTransport {
    state: RadioTransportState,
}

impl Default for RadioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioTransport {
    pub const fn new() -> Self {
        RadioTransport {
            state: RadioTransportState::Uninitialized,
        }
    }

    /// Resets the driver and spawns the frame delivery task
    ///
    /// # Parameters
    /// * `spawner` - Executor spawner
    /// * `radio` - Shared driver, also used by the application for transmitting
    /// * `delivery` - Wake signal, notified by the backend's interrupt handlers
    /// * `timestamps` - Frame-boundary capture, written by the edge interrupt
    ///
    /// # Returns
    /// * `Err(RadioError::TaskSpawnFailed)` if the delivery task could not be spawned
    /// * any error of [`RadioDriver::init`]
    #[cfg(feature = "embedded")]
    pub fn initialize<M, T, E>(
        &mut self,
        spawner: Spawner,
        radio: &'static SharedRadio<M, T, E>,
        delivery: &'static FrameDelivery,
        timestamps: &'static TimestampCapture,
    ) -> Result<(), RadioError>
    where
        M: RawMutex + 'static,
        T: Transceiver + 'static,
        E: EnergyAccounting + 'static,
    {
        self.initialize_common(spawner, radio, delivery, timestamps, &RX_FRAME_QUEUE)
    }

    #[cfg(feature = "std")]
    pub fn initialize<M, T, E>(
        &mut self,
        spawner: Spawner,
        radio: &'static SharedRadio<M, T, E>,
        delivery: &'static FrameDelivery,
        timestamps: &'static TimestampCapture,
    ) -> Result<(), RadioError>
    where
        M: RawMutex + 'static,
        T: Transceiver + 'static,
        E: EnergyAccounting + 'static,
    {
        let rx_frame_queue_temp: RxFrameQueue = RxFrameQueue::new();
        let rx_frame_queue_static: &'static RxFrameQueue = Box::leak(Box::new(rx_frame_queue_temp));
        self.initialize_common(spawner, radio, delivery, timestamps, rx_frame_queue_static)
    }

    #[cfg(any(feature = "std", feature = "embedded"))]
    fn initialize_common<M, T, E>(
        &mut self,
        spawner: Spawner,
        radio: &'static SharedRadio<M, T, E>,
        delivery: &'static FrameDelivery,
        timestamps: &'static TimestampCapture,
        rx_frame_queue: &'static RxFrameQueue,
    ) -> Result<(), RadioError>
    where
        M: RawMutex + 'static,
        T: Transceiver + 'static,
        E: EnergyAccounting + 'static,
    {
        radio_driver::with_radio(radio, |radio| radio.init())?;

        let frame_delivery_task_result = spawner.spawn(frame_delivery::frame_delivery_task(radio, delivery, timestamps, rx_frame_queue.sender()));
        if frame_delivery_task_result.is_err() {
            return Err(RadioError::TaskSpawnFailed);
        }
        log!(Level::Debug, "Frame delivery task spawned");
        log!(Level::Info, "Radio transport initialized");

        self.state = RadioTransportState::Initialized {
            rx_frame_queue_receiver: rx_frame_queue.receiver(),
        };
        Ok(())
    }

    /// Receiving end of the received frame queue, for consumers such as the slot scheduler
    pub fn frame_receiver(&self) -> Result<RxFrameQueueReceiver, ReceiveFrameError> {
        match &self.state {
            RadioTransportState::Uninitialized => Err(ReceiveFrameError::NotInited),
            RadioTransportState::Initialized { rx_frame_queue_receiver } => Ok(*rx_frame_queue_receiver),
        }
    }

    /// Waits for the next received frame
    pub async fn receive_frame(&self) -> Result<ReceivedFrame, ReceiveFrameError> {
        let receiver = self.frame_receiver()?;
        Ok(receiver.receive().await)
    }

    /// Takes a received frame if one is queued
    pub fn try_receive_frame(&self) -> Result<Option<ReceivedFrame>, ReceiveFrameError> {
        let receiver = self.frame_receiver()?;
        Ok(receiver.try_receive().ok())
    }
}
