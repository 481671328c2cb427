//! # Frame Delivery - Hands Received Frames to the Upper Layer
//!
//! The delivery task sleeps on a [`FrameDelivery`] signal. Interrupt-side code wakes it:
//! - the bus backend's frame-pending interrupt calls [`FrameDelivery::notify_frame_pending`]
//! - the serial byte-arrival handler calls [`FrameDelivery::notify_line`] with the decoded
//!   frame when the terminating newline arrives
//!
//! On wake the task performs exactly one delivery: for a pending bus frame it reads the
//! frame through the driver and tags it with the latest start-of-frame timestamp, for a
//! serial line it forwards the decoded frame as is. The result goes into the received
//! frame queue.
//!
//! ## Limitations
//!
//! The signal holds a single event. Frames arriving faster than the task runs overwrite
//! each other's notification and only the most recent is delivered. A full received
//! frame queue drops the frame with a warning.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::TrySendError;
use embassy_sync::signal::Signal;
use log::{Level, log};

use crate::RxFrameQueueSender;
use crate::messages::{Frame, ReceivedFrame};
use crate::radio_driver::PendingFrameReader;
use crate::timestamp_capture::{Ticks, TimestampCapture};

/// Reason the delivery task was woken
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "std"), derive(Debug))]
pub enum RxEvent {
    /// A complete frame waits in the transceiver's inbound FIFO
    FramePending,
    /// The serial backend decoded a complete line
    Line(ReceivedFrame),
}

/// Wake-up signal of the delivery task, safe to use from interrupt context
pub struct FrameDelivery {
    signal: Signal<CriticalSectionRawMutex, RxEvent>,
}

impl Default for FrameDelivery {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDelivery {
    pub const fn new() -> Self {
        FrameDelivery { signal: Signal::new() }
    }

    pub fn notify_frame_pending(&self) {
        self.signal.signal(RxEvent::FramePending);
    }

    pub fn notify_line(&self, frame: Frame, timestamp: Ticks) {
        self.signal.signal(RxEvent::Line(ReceivedFrame { frame, timestamp }));
    }

    pub async fn wait(&self) -> RxEvent {
        self.signal.wait().await
    }

    pub fn try_take(&self) -> Option<RxEvent> {
        self.signal.try_take()
    }
}

/// Runs one delivery for `event`
///
/// # Parameters
/// * `event` - What woke the task
/// * `reader` - Read access to the driver, used for pending bus frames
/// * `timestamps` - Source of the start-of-frame timestamp
/// * `sender` - Received frame queue
///
/// # Returns
/// `true` if a frame was queued
pub fn deliver(event: RxEvent, reader: &dyn PendingFrameReader, timestamps: &TimestampCapture, sender: &RxFrameQueueSender) -> bool {
    let received = match event {
        RxEvent::FramePending => {
            let mut frame = Frame::new();
            let timestamp = timestamps.start_time();
            match reader.read_pending(&mut frame.data) {
                Ok(0) => {
                    log::trace!("Woken without a pending frame");
                    return false;
                }
                Ok(length) => {
                    frame.length = length;
                    ReceivedFrame { frame, timestamp }
                }
                Err(err) => {
                    log!(Level::Warn, "Failed to read pending frame: {}", err);
                    return false;
                }
            }
        }
        RxEvent::Line(received) => {
            if received.frame.is_empty() {
                log::trace!("Empty serial line ignored");
                return false;
            }
            received
        }
    };

    log!(Level::Debug, "Delivering {} byte frame captured at {}", received.frame.length, received.timestamp);
    match sender.try_send(received) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log!(Level::Warn, "Received frame queue is full, frame dropped");
            false
        }
    }
}

#[cfg_attr(feature = "std", embassy_executor::task(pool_size = 4))]
#[cfg_attr(feature = "embedded", embassy_executor::task(pool_size = 1))]
#[cfg_attr(not(any(feature = "std", feature = "embedded")), allow(dead_code))]
pub(crate) async fn frame_delivery_task(
    reader: &'static dyn PendingFrameReader,
    delivery: &'static FrameDelivery,
    timestamps: &'static TimestampCapture,
    sender: RxFrameQueueSender,
) -> ! {
    log!(Level::Debug, "Frame delivery task started");
    loop {
        let event = delivery.wait().await;
        deliver(event, reader, timestamps, &sender);
    }
}
