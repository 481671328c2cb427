//! # Radio Driver - Transport State Machine of the Backscatter Tag
//!
//! Implements the radio-driver contract (init, prepare, transmit, send, read, on, off,
//! cca, receiving, pending) on top of any [`Transceiver`] backend.
//!
//! ## Architecture
//!
//! The driver tracks one of three modes:
//! - **Off**: receiver disabled (initial mode)
//! - **ReceiveOn**: receiver enabled, entered by `on()`
//! - **TransmitInProgress**: held from the transmit strobe until the frame has left,
//!   then the driver goes back to the mode it had before `transmit()`
//!
//! Every state-changing operation runs under the [`RadioLock`]. `on()`/`off()` requested
//! while the lock is held are deferred and applied when the outermost operation
//! releases the lock, so a transmission in flight is never cut short.
//!
//! ## Timing
//!
//! Waiting for frame start and frame end are bounded busy-waits, not task suspensions.
//! They block the cooperative context for their duration. Frame start is polled a fixed
//! number of times (`tx_start_poll_budget`); frame end is bounded by the backend's
//! length-derived timeout. A missed frame start is a collision. A missed frame end is
//! logged and treated as complete.
//!
//! ## Sharing
//!
//! The driver is owned by the cooperative context. The application and the frame
//! delivery task share it through [`SharedRadio`]; interrupt handlers never touch it.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant};
use log::{Level, log};

use crate::energy::{EnergyAccounting, EnergyState};
use crate::radio_devices::{Strobe, Transceiver, TransceiverError};
use crate::radio_lock::{PendingTransition, RadioLock};
use crate::{MAX_FRAME_LEN, RadioError, RadioParam, RadioValue, TRAILER_LEN, TxStatus};

/// Default number of frame-start polls after the transmit strobe
const DEFAULT_TX_START_POLL_BUDGET: u32 = 800;

/// Default bound for `off()` waiting on an active frame
const DEFAULT_OFF_WAIT_TIMEOUT_MS: u64 = 100;

/// Driver mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    Off,
    ReceiveOn,
    TransmitInProgress,
}

/// Timing configuration of the transport driver
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Polls of the frame-start signal after the transmit strobe before giving up.
    /// Calibrate to cover 20 symbol periods on the target CPU.
    pub tx_start_poll_budget: u32,
    /// How long `off()` waits for an asserted frame-boundary signal to clear
    pub off_wait_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            tx_start_poll_budget: DEFAULT_TX_START_POLL_BUDGET,
            off_wait_timeout: Duration::from_millis(DEFAULT_OFF_WAIT_TIMEOUT_MS),
        }
    }
}

/// Driver shared between tasks of the cooperative context
///
/// `NoopRawMutex` is sufficient when every user runs on the same executor.
pub type SharedRadio<M, T, E> = Mutex<M, RefCell<RadioDriver<T, E>>>;

/// Read access used by the frame delivery task
///
/// Type-erases the driver so the delivery task can be a concrete embassy task.
pub trait PendingFrameReader {
    /// Reads the pending frame payload into `buffer`, see [`RadioDriver::read`]
    fn read_pending(&self, buffer: &mut [u8]) -> Result<usize, RadioError>;
}

impl<M, T, E> PendingFrameReader for SharedRadio<M, T, E>
where
    M: RawMutex,
    T: Transceiver,
    E: EnergyAccounting,
{
    fn read_pending(&self, buffer: &mut [u8]) -> Result<usize, RadioError> {
        with_radio(self, |radio| radio.read(buffer))
    }
}

/// Runs `operation` on the shared driver
///
/// # Returns
/// `Err(RadioError::Busy)` if the driver is already borrowed further up the call stack,
/// otherwise the result of `operation`
pub fn with_radio<M, T, E, R>(radio: &SharedRadio<M, T, E>, operation: impl FnOnce(&mut RadioDriver<T, E>) -> Result<R, RadioError>) -> Result<R, RadioError>
where
    M: RawMutex,
    T: Transceiver,
    E: EnergyAccounting,
{
    radio.lock(|radio| match radio.try_borrow_mut() {
        Ok(mut radio) => operation(&mut radio),
        Err(_) => Err(RadioError::Busy),
    })
}

/// Transport driver over one transceiver backend
///
/// # Type Parameters
/// - `T`: the transceiver backend
/// - `E`: energy-accounting collaborator
///
/// # Example
/// ```rust
/// use backscatter_radio_lib::energy::NoEnergyAccounting;
/// use backscatter_radio_lib::radio_devices::SimulatedTransceiver;
/// use backscatter_radio_lib::radio_driver::{RadioDriver, TransportConfig};
/// use backscatter_radio_lib::TxStatus;
///
/// let mut radio = RadioDriver::new(SimulatedTransceiver::default(), NoEnergyAccounting, TransportConfig::default());
/// radio.init().unwrap();
/// radio.on().unwrap();
/// assert_eq!(radio.send(b"hello").unwrap(), TxStatus::Ok);
/// ```
pub struct RadioDriver<T, E> {
    transceiver: T,
    energy: E,
    config: TransportConfig,
    mode: DriverMode,
    lock: RadioLock,
}

impl<T, E> RadioDriver<T, E>
where
    T: Transceiver,
    E: EnergyAccounting,
{
    /// Creates a driver in the `Off` mode
    ///
    /// The hardware is not touched until [`RadioDriver::init`] is called.
    pub fn new(transceiver: T, energy: E, config: TransportConfig) -> Self {
        RadioDriver {
            transceiver,
            energy,
            config,
            mode: DriverMode::Off,
            lock: RadioLock::new(),
        }
    }

    /// Resets the transceiver to off and clears the driver state
    ///
    /// Call exactly once, before any other operation. The frame delivery task is
    /// started by [`crate::initialize`], which calls this.
    pub fn init(&mut self) -> Result<(), RadioError> {
        self.lock.reset();
        self.transceiver.strobe(Strobe::Off)?;
        self.mode = DriverMode::Off;
        log!(Level::Debug, "Radio driver initialized");
        Ok(())
    }

    pub fn mode(&self) -> DriverMode {
        self.mode
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }

    pub fn transceiver_mut(&mut self) -> &mut T {
        &mut self.transceiver
    }

    pub fn energy(&self) -> &E {
        &self.energy
    }

    /// Runs `operation` with the driver lock held
    ///
    /// `on()`/`off()` called inside are deferred until `operation` returns. The most
    /// recent request wins and is applied once, only if it changes the mode.
    pub fn locked<R>(&mut self, operation: impl FnOnce(&mut Self) -> R) -> R {
        self.lock.acquire();
        let result = operation(self);
        self.release_lock();
        result
    }

    fn release_lock(&mut self) {
        let mut pending = self.lock.release();
        while let Some(transition) = pending {
            self.lock.acquire();
            self.apply_deferred(transition);
            pending = self.lock.release();
        }
    }

    fn apply_deferred(&mut self, transition: PendingTransition) {
        let result = match transition {
            PendingTransition::On if self.mode != DriverMode::ReceiveOn => {
                log!(Level::Debug, "Applying deferred on");
                self.receiver_on()
            }
            PendingTransition::Off if self.mode != DriverMode::Off => {
                log!(Level::Debug, "Applying deferred off");
                self.receiver_off()
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            log!(Level::Error, "Deferred {:?} failed: {:?}", transition, err);
        }
    }

    /// Stages a frame for transmission
    ///
    /// Overwrites any frame prepared earlier and not yet transmitted.
    ///
    /// # Returns
    /// * `Ok(())` once the frame is in the backend's outbound staging area
    /// * `Err(RadioError::FrameTooLong)` if payload and trailer exceed `MAX_FRAME_LEN`
    pub fn prepare(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() + TRAILER_LEN > MAX_FRAME_LEN {
            return Err(RadioError::FrameTooLong(payload.len()));
        }
        self.locked(|radio| {
            log::trace!("Preparing {} bytes", payload.len());
            radio.transceiver.strobe(Strobe::FlushTx)?;
            radio.transceiver.write_frame(payload)?;
            Ok(())
        })
    }

    /// Transmits the prepared frame
    ///
    /// # Returns
    /// * `Ok(TxStatus::Ok)` when the frame went out; the previous mode is restored
    /// * `Ok(TxStatus::Collision)` when the frame start was never observed; the caller
    ///   may retry
    /// * `Err(RadioError::Transceiver)` if the backend failed
    pub fn transmit(&mut self, payload_len: usize) -> Result<TxStatus, RadioError> {
        self.locked(|radio| radio.transmit_locked(payload_len))
    }

    fn transmit_locked(&mut self, payload_len: usize) -> Result<TxStatus, RadioError> {
        let previous = self.mode;
        let receive_was_on = previous == DriverMode::ReceiveOn;

        self.transceiver.strobe(Strobe::TxOn)?;
        self.mode = DriverMode::TransmitInProgress;

        for _ in 0..self.config.tx_start_poll_budget {
            if !self.transceiver.transmission_started() {
                continue;
            }
            if receive_was_on {
                self.energy.off(EnergyState::Listen);
            }
            self.energy.on(EnergyState::Transmit);
            self.wait_for_transmission_end(payload_len);
            self.energy.off(EnergyState::Transmit);

            // the front end drops back to receive after TX, so off must be explicit
            self.mode = previous;
            if receive_was_on {
                self.receiver_on()?;
            } else {
                self.receiver_off()?;
            }
            log::trace!("Transmitted {} bytes", payload_len);
            return Ok(TxStatus::Ok);
        }

        self.mode = previous;
        log!(Level::Debug, "Frame start not observed after {} polls", self.config.tx_start_poll_budget);
        Ok(TxStatus::Collision)
    }

    fn wait_for_transmission_end(&mut self, payload_len: usize) {
        let timeout = self.transceiver.transmission_timeout(payload_len);
        let deadline = Instant::now() + timeout;
        while !self.transceiver.transmission_ended() {
            if Instant::now() >= deadline {
                log!(Level::Warn, "Transmission end not observed within {} us", timeout.as_micros());
                return;
            }
        }
    }

    /// `prepare` followed by `transmit`, not atomic across the two
    pub fn send(&mut self, payload: &[u8]) -> Result<TxStatus, RadioError> {
        self.prepare(payload)?;
        self.transmit(payload.len())
    }

    /// Enables the receiver
    ///
    /// No-op if the receiver is already on. Deferred if the lock is held.
    pub fn on(&mut self) -> Result<(), RadioError> {
        if self.lock.request_on() {
            log::trace!("Radio locked, deferring on");
            return Ok(());
        }
        if self.mode == DriverMode::ReceiveOn {
            return Ok(());
        }
        self.locked(|radio| radio.receiver_on())
    }

    /// Disables the receiver
    ///
    /// No-op if the radio is already off. Deferred if the lock is held.
    pub fn off(&mut self) -> Result<(), RadioError> {
        if self.lock.request_off() {
            log::trace!("Radio locked, deferring off");
            return Ok(());
        }
        if self.mode == DriverMode::Off {
            return Ok(());
        }
        self.locked(|radio| radio.receiver_off())
    }

    fn receiver_on(&mut self) -> Result<(), RadioError> {
        self.transceiver.strobe(Strobe::RxOn)?;
        self.energy.on(EnergyState::Listen);
        self.mode = DriverMode::ReceiveOn;
        log::trace!("Receiver on");
        Ok(())
    }

    fn receiver_off(&mut self) -> Result<(), RadioError> {
        self.mode = DriverMode::Off;
        self.wait_for_frame_boundary_clear();
        self.energy.off(EnergyState::Listen);
        self.transceiver.strobe(Strobe::Off)?;
        log::trace!("Receiver off");
        Ok(())
    }

    fn wait_for_frame_boundary_clear(&mut self) {
        let deadline = Instant::now() + self.config.off_wait_timeout;
        while self.transceiver.frame_boundary() {
            if Instant::now() >= deadline {
                log!(Level::Warn, "Frame boundary still asserted, switching off anyway");
                return;
            }
        }
    }

    /// Reads the pending frame payload into `buffer`
    ///
    /// # Returns
    /// * `Ok(0)` if no frame is pending
    /// * `Ok(n)` with the payload length, trailer excluded
    /// * `Err(RadioError::MalformedFrame)` if the declared length is shorter than the
    ///   trailer or longer than `MAX_FRAME_LEN`
    /// * `Err(RadioError::BufferTooSmall)` if the payload does not fit `buffer`
    ///
    /// The inbound FIFO is flushed in every case where a frame was pending.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, RadioError> {
        if !self.transceiver.frame_pending() {
            return Ok(0);
        }
        self.locked(|radio| radio.read_locked(buffer))
    }

    fn read_locked(&mut self, buffer: &mut [u8]) -> Result<usize, RadioError> {
        let mut declared = [0u8; 1];
        self.transceiver.read_rx_fifo(&mut declared)?;
        let declared = declared[0];

        if (declared as usize) < TRAILER_LEN || declared as usize > MAX_FRAME_LEN {
            self.flush_rx()?;
            return Err(RadioError::MalformedFrame(declared));
        }
        let payload_len = declared as usize - TRAILER_LEN;
        if payload_len > buffer.len() {
            self.flush_rx()?;
            return Err(RadioError::BufferTooSmall(payload_len));
        }

        self.transceiver.read_rx_fifo(&mut buffer[..payload_len])?;
        self.flush_rx()?;
        Ok(payload_len)
    }

    fn flush_rx(&mut self) -> Result<(), TransceiverError> {
        let mut dummy = [0u8; 1];
        self.transceiver.read_rx_fifo(&mut dummy)?;
        // a single flush can leave stale state behind
        self.transceiver.strobe(Strobe::FlushRx)?;
        self.transceiver.strobe(Strobe::FlushRx)
    }

    pub fn cca(&mut self) -> bool {
        self.transceiver.clear_channel()
    }

    pub fn receiving_packet(&mut self) -> bool {
        self.transceiver.frame_boundary()
    }

    pub fn pending_packet(&mut self) -> bool {
        self.transceiver.frame_pending()
    }

    pub fn get_value(&mut self, param: RadioParam) -> Result<RadioValue, RadioError> {
        Ok(self.transceiver.get_value(param)?)
    }

    pub fn set_value(&mut self, param: RadioParam, value: RadioValue) -> Result<(), RadioError> {
        Ok(self.transceiver.set_value(param, value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::NoEnergyAccounting;
    use crate::radio_devices::simulated::{SimulatedBehaviour, SimulatedTransceiver};
    use crate::MAX_PAYLOAD_LEN;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn driver(behaviour: SimulatedBehaviour) -> RadioDriver<SimulatedTransceiver, NoEnergyAccounting> {
        let mut radio = RadioDriver::new(SimulatedTransceiver::new(behaviour), NoEnergyAccounting, TransportConfig::default());
        radio.init().unwrap();
        radio
    }

    #[derive(Default)]
    struct EnergyRecorder(Vec<(bool, EnergyState)>);

    impl EnergyAccounting for EnergyRecorder {
        fn on(&mut self, state: EnergyState) {
            self.0.push((true, state));
        }
        fn off(&mut self, state: EnergyState) {
            self.0.push((false, state));
        }
    }

    #[test]
    fn every_legal_payload_length_transmits() {
        let mut radio = driver(SimulatedBehaviour::default());
        let payload = [0x5Au8; MAX_PAYLOAD_LEN];
        for len in 0..=MAX_PAYLOAD_LEN {
            radio.prepare(&payload[..len]).unwrap();
            assert_eq!(radio.transmit(len).unwrap(), TxStatus::Ok, "length {}", len);
        }
        assert_eq!(radio.transceiver().transmitted(), MAX_PAYLOAD_LEN + 1);
    }

    #[test]
    fn prepare_rejects_frame_over_maximum() {
        let mut radio = driver(SimulatedBehaviour::default());
        let payload = [0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(radio.prepare(&payload), Err(RadioError::FrameTooLong(MAX_PAYLOAD_LEN + 1)));
        assert_eq!(radio.transceiver().strobe_count(Strobe::FlushTx), 0);
        assert!(!radio.is_locked());
    }

    #[test]
    fn prepare_overwrites_previous_frame() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.prepare(b"first").unwrap();
        radio.prepare(b"2nd").unwrap();
        assert_eq!(radio.transceiver().staged(), &[5, b'2', b'n', b'd']);
    }

    #[test]
    fn frame_start_on_fifth_of_twenty_polls_is_ok() {
        let mut radio = driver(SimulatedBehaviour {
            start_on_poll: Some(5),
            ..SimulatedBehaviour::default()
        });
        radio.config.tx_start_poll_budget = 20;
        radio.prepare(&[0u8; 20]).unwrap();
        assert_eq!(radio.transmit(20).unwrap(), TxStatus::Ok);
        assert_eq!(radio.mode(), DriverMode::Off);
    }

    #[test]
    fn missing_frame_start_is_a_collision() {
        let mut radio = driver(SimulatedBehaviour {
            start_on_poll: None,
            ..SimulatedBehaviour::default()
        });
        radio.config.tx_start_poll_budget = 20;
        radio.on().unwrap();
        radio.prepare(&[0u8; 20]).unwrap();
        assert_eq!(radio.transmit(20).unwrap(), TxStatus::Collision);
        assert_eq!(radio.mode(), DriverMode::ReceiveOn);
        assert!(!radio.is_locked());
    }

    #[test]
    fn missing_frame_end_times_out_and_completes() {
        let mut radio = driver(SimulatedBehaviour {
            end_on_poll: None,
            tx_timeout: Duration::from_millis(2),
            ..SimulatedBehaviour::default()
        });
        let started = Instant::now();
        assert_eq!(radio.send(b"slow").unwrap(), TxStatus::Ok);
        assert!(started.elapsed() >= Duration::from_millis(2));
        assert_eq!(radio.mode(), DriverMode::Off);
    }

    #[test]
    fn transmit_restores_receive_mode_and_accounts_energy() {
        let mut radio = RadioDriver::new(SimulatedTransceiver::default(), EnergyRecorder::default(), TransportConfig::default());
        radio.init().unwrap();
        radio.on().unwrap();
        radio.send(b"x").unwrap();

        assert_eq!(radio.mode(), DriverMode::ReceiveOn);
        assert_eq!(radio.transceiver().strobe_count(Strobe::RxOn), 2);
        assert_eq!(
            radio.energy().0,
            vec![
                (true, EnergyState::Listen),
                (false, EnergyState::Listen),
                (true, EnergyState::Transmit),
                (false, EnergyState::Transmit),
                (true, EnergyState::Listen),
            ]
        );
    }

    #[test]
    fn transmit_from_off_switches_front_end_off_again() {
        let mut radio = driver(SimulatedBehaviour::default());
        let off_before = radio.transceiver().strobe_count(Strobe::Off);
        radio.send(b"x").unwrap();
        assert_eq!(radio.mode(), DriverMode::Off);
        assert_eq!(radio.transceiver().strobe_count(Strobe::Off), off_before + 1);
    }

    #[test]
    fn repeated_on_strobes_receiver_once() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.on().unwrap();
        radio.on().unwrap();
        assert_eq!(radio.transceiver().strobe_count(Strobe::RxOn), 1);
        assert_eq!(radio.mode(), DriverMode::ReceiveOn);
    }

    #[test]
    fn off_when_already_off_does_not_strobe() {
        let mut radio = driver(SimulatedBehaviour::default());
        let off_after_init = radio.transceiver().strobe_count(Strobe::Off);
        radio.off().unwrap();
        assert_eq!(radio.transceiver().strobe_count(Strobe::Off), off_after_init);
    }

    #[test]
    fn off_waits_for_frame_boundary_before_switching_off() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.config.off_wait_timeout = Duration::from_millis(30);
        radio.on().unwrap();
        // put the front end on air without ending the frame
        radio.transceiver_mut().strobe(Strobe::TxOn).unwrap();
        assert!(radio.transceiver_mut().transmission_started());
        assert!(radio.receiving_packet());
        let off_before = radio.transceiver().strobe_count(Strobe::Off);

        let started = Instant::now();
        radio.off().unwrap();

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(radio.transceiver().strobe_count(Strobe::Off), off_before + 1);
        assert_eq!(radio.mode(), DriverMode::Off);
    }

    #[test]
    fn deferred_requests_apply_most_recent_exactly_once() {
        #[derive(Clone, Copy, PartialEq, Debug)]
        enum Call {
            On,
            Off,
        }
        let calls = [Call::On, Call::Off];

        for start_on in [false, true] {
            for len in 1..=4u32 {
                for combo in 0..(1u32 << len) {
                    let sequence: Vec<Call> = (0..len).map(|i| calls[((combo >> i) & 1) as usize]).collect();
                    let mut radio = driver(SimulatedBehaviour::default());
                    if start_on {
                        radio.on().unwrap();
                    }
                    let rx_before = radio.transceiver().strobe_count(Strobe::RxOn);
                    let off_before = radio.transceiver().strobe_count(Strobe::Off);

                    radio.locked(|radio| {
                        for call in &sequence {
                            match call {
                                Call::On => radio.on().unwrap(),
                                Call::Off => radio.off().unwrap(),
                            }
                            // nothing happens while locked
                            assert_eq!(radio.mode(), if start_on { DriverMode::ReceiveOn } else { DriverMode::Off });
                        }
                    });

                    let last = *sequence.last().unwrap();
                    let expected = if last == Call::On { DriverMode::ReceiveOn } else { DriverMode::Off };
                    assert_eq!(radio.mode(), expected, "sequence {:?} start_on {}", sequence, start_on);

                    let rx_strobes = radio.transceiver().strobe_count(Strobe::RxOn) - rx_before;
                    let off_strobes = radio.transceiver().strobe_count(Strobe::Off) - off_before;
                    let changed = (expected == DriverMode::ReceiveOn) != start_on;
                    assert_eq!(rx_strobes + off_strobes, changed as usize, "sequence {:?}", sequence);
                    assert!(!radio.is_locked());
                }
            }
        }
    }

    #[test]
    fn off_requested_during_transmit_applies_after_receive_is_restored() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.on().unwrap();
        let status = radio.locked(|radio| {
            radio.off().unwrap();
            radio.send(b"beacon").unwrap()
        });
        assert_eq!(status, TxStatus::Ok);
        assert_eq!(radio.mode(), DriverMode::Off);
    }

    #[test]
    fn read_without_pending_frame_returns_zero() {
        let mut radio = driver(SimulatedBehaviour::default());
        let mut buffer = [0u8; 8];
        assert_eq!(radio.read(&mut buffer), Ok(0));
        assert_eq!(radio.transceiver().strobe_count(Strobe::FlushRx), 0);
    }

    #[test]
    fn read_strips_trailer_and_flushes_twice() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.transceiver_mut().inject_frame(b"abc", None);
        let mut buffer = [0u8; MAX_PAYLOAD_LEN];
        assert_eq!(radio.read(&mut buffer), Ok(3));
        assert_eq!(&buffer[..3], b"abc");
        assert_eq!(radio.transceiver().strobe_count(Strobe::FlushRx), 2);
        assert!(!radio.pending_packet());
    }

    #[test]
    fn read_rejects_payload_larger_than_buffer() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.transceiver_mut().inject_frame(&[1u8; 10], None);
        let mut buffer = [0u8; 4];
        assert_eq!(radio.read(&mut buffer), Err(RadioError::BufferTooSmall(10)));
        assert!(!radio.pending_packet());
    }

    #[test]
    fn read_rejects_length_shorter_than_trailer() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.transceiver_mut().inject_frame(&[], Some(1));
        let mut buffer = [0u8; MAX_PAYLOAD_LEN];
        assert_eq!(radio.read(&mut buffer), Err(RadioError::MalformedFrame(1)));
        assert!(!radio.is_locked());
    }

    #[test]
    fn out_of_band_parameters_are_not_supported() {
        let mut radio = driver(SimulatedBehaviour::default());
        assert_eq!(radio.get_value(RadioParam::Channel), Err(RadioError::NotSupported));
        assert_eq!(radio.set_value(RadioParam::TxPower, 0), Err(RadioError::NotSupported));
    }

    #[test]
    fn cca_follows_backend() {
        let mut radio = driver(SimulatedBehaviour {
            clear_channel: false,
            ..SimulatedBehaviour::default()
        });
        assert!(!radio.cca());
    }

    #[test]
    fn shared_radio_reads_pending_frame() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.transceiver_mut().inject_frame(b"shared", None);
        let shared: SharedRadio<NoopRawMutex, _, _> = Mutex::new(RefCell::new(radio));
        let mut buffer = [0u8; MAX_PAYLOAD_LEN];
        assert_eq!(shared.read_pending(&mut buffer), Ok(6));
        assert_eq!(&buffer[..6], b"shared");
    }

    #[test]
    fn with_radio_reports_busy_on_reentrant_borrow() {
        let mut radio = driver(SimulatedBehaviour::default());
        radio.transceiver_mut().inject_frame(b"kept", None);
        let shared: SharedRadio<NoopRawMutex, _, _> = Mutex::new(RefCell::new(radio));
        let mut buffer = [0u8; MAX_PAYLOAD_LEN];

        let nested = with_radio(&shared, |_| with_radio(&shared, |radio| radio.read(&mut buffer)));
        assert_eq!(nested, Err(RadioError::Busy));

        // the inner read never ran, the frame is still pending
        assert_eq!(with_radio(&shared, |radio| Ok(radio.pending_packet())), Ok(true));
    }
}
