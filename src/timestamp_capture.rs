//! # Timestamp Capture - Start/End-of-Frame Edge Timestamps
//!
//! Interrupt-side bookkeeping for the frame-boundary (SFD) signal of the bus transceiver.
//! The edge interrupt handler calls [`TimestampCapture::on_edge`] with the captured
//! timer value; everything else only reads.
//!
//! ## Invariants
//!
//! - `start_time` is the capture of the most recent rising edge
//! - `end_time` is the capture of the most recent falling edge
//! - `edge_count` increments on each rising edge and resets to zero on each falling edge,
//!   so a value above one means glitch edges were seen inside a frame
//!
//! ## Design Considerations
//!
//! - Single writer (the interrupt), so plain atomic loads and stores are enough.
//!   No read-modify-write instructions are used, which keeps this usable on cores
//!   without compare-and-swap (Cortex-M0+).
//! - The handler never blocks and never touches the driver lock.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use embassy_time::{Duration, Instant};

/// Hardware clock ticks as captured by the timer peripheral (wrapping)
pub type Ticks = u32;

/// Level of the frame-boundary signal right after the edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Consistent copy of the capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampPair {
    pub start_time: Ticks,
    pub end_time: Ticks,
    pub edge_count: u8,
}

pub struct TimestampCapture {
    start_time: AtomicU32,
    end_time: AtomicU32,
    edge_count: AtomicU8,
}

impl Default for TimestampCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampCapture {
    pub const fn new() -> Self {
        TimestampCapture {
            start_time: AtomicU32::new(0),
            end_time: AtomicU32::new(0),
            edge_count: AtomicU8::new(0),
        }
    }

    /// Records one edge of the frame-boundary signal
    ///
    /// Called from the capture interrupt. `captured` is the timer value latched by
    /// the hardware for this edge.
    pub fn on_edge(&self, edge: Edge, captured: Ticks) {
        match edge {
            Edge::Rising => {
                let count = self.edge_count.load(Ordering::Relaxed);
                self.edge_count.store(count.saturating_add(1), Ordering::Relaxed);
                self.start_time.store(captured, Ordering::Release);
            }
            Edge::Falling => {
                self.edge_count.store(0, Ordering::Relaxed);
                self.end_time.store(captured, Ordering::Release);
            }
        }
    }

    /// Records an edge using the current embassy tick count
    ///
    /// For platforms where the edge arrives as a plain GPIO interrupt rather than a
    /// timer capture.
    pub fn on_edge_now(&self, edge: Edge) {
        self.on_edge(edge, now_ticks());
    }

    pub fn start_time(&self) -> Ticks {
        self.start_time.load(Ordering::Acquire)
    }

    pub fn end_time(&self) -> Ticks {
        self.end_time.load(Ordering::Acquire)
    }

    pub fn edge_count(&self) -> u8 {
        self.edge_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TimestampPair {
        TimestampPair {
            start_time: self.start_time(),
            end_time: self.end_time(),
            edge_count: self.edge_count(),
        }
    }
}

/// Current embassy tick count truncated to the capture width
pub fn now_ticks() -> Ticks {
    Instant::now().as_ticks() as Ticks
}

/// Converts a wrapping capture value back into an `Instant`
///
/// Assumes the capture lies in the past and less than one wrap period ago.
pub fn ticks_to_instant(ticks: Ticks) -> Instant {
    let now = Instant::now();
    let age = (now.as_ticks() as Ticks).wrapping_sub(ticks);
    let age = Duration::from_ticks(age as u64);
    if age.as_ticks() > now.as_ticks() {
        return Instant::from_ticks(0);
    }
    now - age
}
