//! # Simulated Transceiver - Loopback Backend for Hosts and Tests
//!
//! In-memory transceiver that behaves like the bus front end without hardware:
//! the staged frame can be looped back into the inbound FIFO on transmit, and the
//! frame-start and frame-end signals appear after a configurable number of polls.
//!
//! ## Fault Injection
//!
//! - `start_on_poll: None` never asserts frame-start, so every transmit is a collision
//! - `end_on_poll: None` never ends a transmission, so the driver hits its timeout
//! - `clear_channel` sets the CCA answer
//!
//! Every strobe is counted so callers can check exactly which commands the driver
//! issued.

use embassy_time::Duration;

use super::{Strobe, Transceiver, TransceiverError};
use crate::{MAX_FRAME_LEN, MAX_PAYLOAD_LEN, TRAILER_LEN};

/// Behaviour knobs of the simulated front end
#[derive(Debug, Clone, Copy)]
pub struct SimulatedBehaviour {
    /// Poll (1-based) of `transmission_started` that first sees the frame start
    pub start_on_poll: Option<u32>,
    /// Poll (1-based) of `transmission_ended` that first sees the frame end
    pub end_on_poll: Option<u32>,
    /// Copy every transmitted frame into the inbound FIFO
    pub loopback: bool,
    pub clear_channel: bool,
    pub tx_timeout: Duration,
}

impl Default for SimulatedBehaviour {
    fn default() -> Self {
        SimulatedBehaviour {
            start_on_poll: Some(1),
            end_on_poll: Some(1),
            loopback: false,
            clear_channel: true,
            tx_timeout: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxPhase {
    Idle,
    Armed { polls: u32 },
    OnAir { polls: u32 },
}

pub struct SimulatedTransceiver {
    behaviour: SimulatedBehaviour,
    outbound: [u8; MAX_FRAME_LEN + 1],
    outbound_len: usize,
    inbound: [u8; MAX_FRAME_LEN + 1],
    inbound_len: usize,
    inbound_pos: usize,
    phase: TxPhase,
    strobe_counts: [usize; 5],
    transmitted: usize,
}

impl Default for SimulatedTransceiver {
    fn default() -> Self {
        Self::new(SimulatedBehaviour::default())
    }
}

fn strobe_index(command: Strobe) -> usize {
    match command {
        Strobe::Off => 0,
        Strobe::TxOn => 1,
        Strobe::RxOn => 2,
        Strobe::FlushTx => 3,
        Strobe::FlushRx => 4,
    }
}

impl SimulatedTransceiver {
    pub const fn new(behaviour: SimulatedBehaviour) -> Self {
        SimulatedTransceiver {
            behaviour,
            outbound: [0u8; MAX_FRAME_LEN + 1],
            outbound_len: 0,
            inbound: [0u8; MAX_FRAME_LEN + 1],
            inbound_len: 0,
            inbound_pos: 0,
            phase: TxPhase::Idle,
            strobe_counts: [0; 5],
            transmitted: 0,
        }
    }

    pub fn behaviour_mut(&mut self) -> &mut SimulatedBehaviour {
        &mut self.behaviour
    }

    /// Number of times `command` was strobed
    pub fn strobe_count(&self, command: Strobe) -> usize {
        self.strobe_counts[strobe_index(command)]
    }

    /// Number of frames that made it on the air
    pub fn transmitted(&self) -> usize {
        self.transmitted
    }

    /// Staged outbound frame in wire format (length byte first)
    pub fn staged(&self) -> &[u8] {
        &self.outbound[..self.outbound_len]
    }

    /// Places a received frame in the inbound FIFO, as if it arrived over the air
    ///
    /// `declared_len` overrides the length byte, to exercise malformed frames.
    pub fn inject_frame(&mut self, payload: &[u8], declared_len: Option<u8>) {
        let payload = &payload[..payload.len().min(MAX_PAYLOAD_LEN)];
        self.inbound[0] = declared_len.unwrap_or((payload.len() + TRAILER_LEN) as u8);
        self.inbound[1..=payload.len()].copy_from_slice(payload);
        self.inbound[payload.len() + 1..payload.len() + 1 + TRAILER_LEN].fill(0xEE);
        self.inbound_len = payload.len() + 1 + TRAILER_LEN;
        self.inbound_pos = 0;
    }

    fn loop_back(&mut self) {
        let staged = self.outbound_len;
        self.inbound[..staged].copy_from_slice(&self.outbound[..staged]);
        let end = (staged + TRAILER_LEN).min(self.inbound.len());
        self.inbound[staged..end].fill(0xEE);
        self.inbound_len = end;
        self.inbound_pos = 0;
    }
}

impl Transceiver for SimulatedTransceiver {
    fn strobe(&mut self, command: Strobe) -> Result<(), TransceiverError> {
        self.strobe_counts[strobe_index(command)] += 1;
        match command {
            Strobe::TxOn => self.phase = TxPhase::Armed { polls: 0 },
            Strobe::FlushTx => self.outbound_len = 0,
            Strobe::FlushRx => {
                self.inbound_len = 0;
                self.inbound_pos = 0;
            }
            Strobe::Off | Strobe::RxOn => {}
        }
        Ok(())
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransceiverError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(TransceiverError::Bus);
        }
        self.outbound[0] = (payload.len() + TRAILER_LEN) as u8;
        self.outbound[1..=payload.len()].copy_from_slice(payload);
        self.outbound_len = payload.len() + 1;
        Ok(())
    }

    fn read_rx_fifo(&mut self, buffer: &mut [u8]) -> Result<(), TransceiverError> {
        for byte in buffer.iter_mut() {
            if self.inbound_pos < self.inbound_len {
                *byte = self.inbound[self.inbound_pos];
                self.inbound_pos += 1;
            } else {
                *byte = 0;
            }
        }
        Ok(())
    }

    fn frame_boundary(&mut self) -> bool {
        matches!(self.phase, TxPhase::OnAir { .. })
    }

    fn frame_pending(&mut self) -> bool {
        self.inbound_pos < self.inbound_len
    }

    fn clear_channel(&mut self) -> bool {
        self.behaviour.clear_channel
    }

    fn transmission_started(&mut self) -> bool {
        match self.phase {
            TxPhase::Armed { polls } => {
                let polls = polls + 1;
                if self.behaviour.start_on_poll.is_some_and(|n| polls >= n) {
                    self.phase = TxPhase::OnAir { polls: 0 };
                    self.transmitted += 1;
                    if self.behaviour.loopback {
                        self.loop_back();
                    }
                    true
                } else {
                    self.phase = TxPhase::Armed { polls };
                    false
                }
            }
            TxPhase::OnAir { .. } => true,
            TxPhase::Idle => false,
        }
    }

    fn transmission_ended(&mut self) -> bool {
        match self.phase {
            TxPhase::OnAir { polls } => {
                let polls = polls + 1;
                if self.behaviour.end_on_poll.is_some_and(|n| polls >= n) {
                    self.phase = TxPhase::Idle;
                    true
                } else {
                    self.phase = TxPhase::OnAir { polls };
                    false
                }
            }
            _ => true,
        }
    }

    fn transmission_timeout(&self, _frame_len: usize) -> Duration {
        self.behaviour.tx_timeout
    }
}
