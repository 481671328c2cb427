//! # Slot Scheduler - Transmission Patterns Built on the Transport Driver
//!
//! Two consumers of the driver used to exercise a tag in the field:
//!
//! - [`run_periodic_broadcast`]: sends an incrementing little-endian `u16` sequence
//!   number at a fixed interval
//! - [`run_synchronized_slots`]: listens for a beacon from the carrier side, derives a
//!   reference time from the beacon's start-of-frame timestamp and then transmits in
//!   randomly chosen slots relative to that reference
//!
//! ## Slot Timing
//!
//! A beacon is a frame whose first byte is `beacon_marker`. Its start-of-frame time plus
//! `beacon_offset` becomes the reference. Before synchronization the first slot fires at
//! the reference itself and switches the receiver off. From then on every slot moves the
//! reference forward by a random gap in `wait_before_tx .. max_slots * slot_duration`
//! and sends the next sequence number, until `max_packets` have been sent. Beacons heard
//! after synchronization re-anchor the reference without moving the slot already armed.
//!
//! The random gap generator is seeded by the caller so that tags sharing a carrier pick
//! different slots.

use embassy_futures::select::{Either3, select3};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant, Ticker, Timer};
use log::{Level, log};
use rand_core::{RngCore, SeedableRng};
use rand_wyrand::WyRand;

use crate::energy::{EnergyAccounting, EnergyReport};
use crate::messages::Frame;
use crate::radio_devices::Transceiver;
use crate::radio_driver::{SharedRadio, with_radio};
use crate::timestamp_capture::ticks_to_instant;
use crate::{RxFrameQueueReceiver, TxStatus};

/// Interval of the periodic broadcast
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(100);

/// Slot pattern parameters
#[derive(Debug, Clone, Copy)]
pub struct SlotConfig {
    pub slot_duration: Duration,
    pub max_slots: u32,
    /// Minimum gap between two consecutive slots
    pub wait_before_tx: Duration,
    /// Delay from the beacon's start of frame to the reference time
    pub beacon_offset: Duration,
    /// First payload byte identifying a beacon
    pub beacon_marker: u8,
    /// Sequence numbers sent before the pattern stops
    pub max_packets: u16,
    /// How often completion is checked; the energy report is logged on completion
    pub report_interval: Duration,
}

impl Default for SlotConfig {
    fn default() -> Self {
        SlotConfig {
            slot_duration: Duration::from_millis(10),
            max_slots: 7,
            wait_before_tx: Duration::from_millis(1),
            beacon_offset: Duration::from_millis(200),
            beacon_marker: b'H',
            max_packets: 1000,
            report_interval: Duration::from_secs(10),
        }
    }
}

/// What the caller has to do when a slot fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    /// First slot after synchronization, the receiver is no longer needed
    SwitchOff,
    /// Transmit this sequence number
    Send(u16),
    /// All packets sent, no further slots are scheduled
    Finished,
}

/// Beacon-synchronized random slot state
pub struct SlotScheduler {
    config: SlotConfig,
    rng: WyRand,
    reference: Option<Instant>,
    next_slot: Option<Instant>,
    in_sync: bool,
    sequence: u16,
}

impl SlotScheduler {
    pub fn new(config: SlotConfig, rng_seed: u64) -> Self {
        SlotScheduler {
            config,
            rng: WyRand::seed_from_u64(rng_seed),
            reference: None,
            next_slot: None,
            in_sync: false,
            sequence: 0,
        }
    }

    pub fn is_beacon(&self, frame: &Frame) -> bool {
        frame.payload().first() == Some(&self.config.beacon_marker)
    }

    /// Anchors the reference on a beacon that started at `frame_start`
    ///
    /// # Returns
    /// `true` if this beacon armed the first slot
    pub fn on_beacon(&mut self, frame_start: Instant) -> bool {
        let reference = frame_start + self.config.beacon_offset;
        self.reference = Some(reference);
        if self.in_sync {
            return false;
        }
        self.next_slot = Some(reference);
        true
    }

    /// Time the armed slot fires, `None` while waiting for a beacon or when finished
    pub fn next_slot(&self) -> Option<Instant> {
        self.next_slot
    }

    pub fn in_sync(&self) -> bool {
        self.in_sync
    }

    /// Sequence number the next `Send` will carry
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn is_finished(&self) -> bool {
        self.in_sync && self.sequence >= self.config.max_packets
    }

    /// Advances past the armed slot and arms the next one
    pub fn on_slot(&mut self) -> SlotAction {
        let Some(reference) = self.reference else {
            self.next_slot = None;
            return SlotAction::Finished;
        };

        if !self.in_sync {
            self.in_sync = true;
            self.sequence = 0;
            self.arm_after(reference);
            return SlotAction::SwitchOff;
        }
        if self.sequence >= self.config.max_packets {
            self.next_slot = None;
            return SlotAction::Finished;
        }

        let sequence = self.sequence;
        self.sequence += 1;
        self.arm_after(reference);
        SlotAction::Send(sequence)
    }

    fn arm_after(&mut self, reference: Instant) {
        let next = reference + self.random_gap();
        self.reference = Some(next);
        self.next_slot = Some(next);
    }

    fn random_gap(&mut self) -> Duration {
        let window = self.config.slot_duration.as_ticks() * self.config.max_slots as u64;
        let minimum = self.config.wait_before_tx.as_ticks();
        if window <= minimum {
            return self.config.wait_before_tx;
        }
        Duration::from_ticks(self.rng.next_u64() % (window - minimum) + minimum)
    }
}

fn send_sequence<M, T, E>(radio: &SharedRadio<M, T, E>, sequence: u16)
where
    M: RawMutex,
    T: Transceiver,
    E: EnergyAccounting,
{
    match with_radio(radio, |radio| radio.send(&sequence.to_le_bytes())) {
        Ok(TxStatus::Ok) => log::trace!("Sequence {} sent", sequence),
        Ok(TxStatus::Collision) => log!(Level::Debug, "Sequence {} lost to collision", sequence),
        Err(err) => log!(Level::Warn, "Sequence {} not sent: {}", sequence, err),
    }
}

/// Sends an incrementing sequence number every `interval`, starting at 1
pub async fn run_periodic_broadcast<M, T, E>(radio: &SharedRadio<M, T, E>, interval: Duration) -> !
where
    M: RawMutex,
    T: Transceiver,
    E: EnergyAccounting,
{
    log!(Level::Info, "Periodic broadcast started, interval {} ms", interval.as_millis());
    let mut ticker = Ticker::every(interval);
    let mut sequence: u16 = 0;
    loop {
        ticker.next().await;
        sequence = sequence.wrapping_add(1);
        send_sequence(radio, sequence);
    }
}

/// Runs the beacon-synchronized slot pattern until `max_packets` are sent
///
/// Enables the receiver to hear the beacon, then consumes received frames from
/// `frames` and fires slots as described in the module docs.
///
/// # Parameters
/// * `radio` - Shared driver
/// * `frames` - Received frame queue fed by the delivery task
/// * `config` - Slot pattern parameters
/// * `rng_seed` - Seed of the slot randomizer, should differ per tag
///
/// # Returns
/// The energy report of the driver's accounting collaborator, if it keeps one
pub async fn run_synchronized_slots<M, T, E>(
    radio: &SharedRadio<M, T, E>,
    frames: RxFrameQueueReceiver,
    config: SlotConfig,
    rng_seed: u64,
) -> Option<EnergyReport>
where
    M: RawMutex,
    T: Transceiver,
    E: EnergyAccounting,
{
    let mut scheduler = SlotScheduler::new(config, rng_seed);
    let mut report_ticker = Ticker::every(config.report_interval);

    if let Err(err) = with_radio(radio, |radio| radio.on()) {
        log!(Level::Error, "Failed to enable receiver for beacon: {}", err);
    }
    log!(Level::Info, "Waiting for beacon");

    loop {
        let slot_at = scheduler.next_slot();
        let slot = async move {
            match slot_at {
                Some(at) => Timer::at(at).await,
                None => core::future::pending::<()>().await,
            }
        };

        match select3(frames.receive(), slot, report_ticker.next()).await {
            Either3::First(received) => {
                if !scheduler.is_beacon(&received.frame) {
                    log::trace!("Ignoring {} byte frame", received.frame.length);
                    continue;
                }
                if scheduler.on_beacon(ticks_to_instant(received.timestamp)) {
                    log!(Level::Debug, "Beacon received, first slot armed");
                } else {
                    log::trace!("Beacon received, reference re-anchored");
                }
            }
            Either3::Second(()) => match scheduler.on_slot() {
                SlotAction::SwitchOff => {
                    log!(Level::Debug, "Synchronized, switching receiver off");
                    if let Err(err) = with_radio(radio, |radio| radio.off()) {
                        log!(Level::Error, "Failed to switch receiver off: {}", err);
                    }
                }
                SlotAction::Send(sequence) => send_sequence(radio, sequence),
                SlotAction::Finished => {}
            },
            Either3::Third(()) => {
                if !scheduler.is_finished() {
                    continue;
                }
                let report = with_radio(radio, |radio| Ok(radio.energy().snapshot())).ok().flatten();
                if let Some(report) = &report {
                    report.log();
                }
                log!(Level::Info, "Slot pattern finished after {} packets", scheduler.sequence());
                return report;
            }
        }
    }
}
