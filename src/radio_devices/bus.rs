//! # Bus Transceiver - Register-Level Tag Front End on SPI
//!
//! Backend for the tag front end that is wired like a CC2420: command strobes and FIFO
//! access over a chip-select gated SPI bus, plus two digital status lines.
//!
//! ## Hardware Requirements
//!
//! - SPI interface (MOSI, MISO, CLK) with a dedicated chip-select line
//! - SFD input: frame-boundary signal, high while a frame is on the air
//! - FIFOP input: frame-pending signal, high while a complete frame waits in the RX FIFO
//!
//! ## Wire Format
//!
//! `[length][payload][2-byte trailer]` where length counts payload and trailer.
//! The front end appends the trailer itself, so only length and payload are written.
//!
//! ## Design Considerations
//!
//! - Every logical operation (a strobe, a frame write, one FIFO read) is a single
//!   `SpiDevice` transaction, so chip-select is asserted exactly for its duration.
//!   The driver lock protects sequences of operations; chip-select protects one.
//! - Reading a FIFO returns a status byte while the address is clocked out. It is
//!   discarded by issuing the address as a write operation.

use embassy_time::{Delay, Duration};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::{Operation, SpiBus, SpiDevice};
use embedded_hal_bus::spi::ExclusiveDevice;

use super::{Strobe, Transceiver, TransceiverError};
use crate::TRAILER_LEN;

/// Command strobe: receiver on
const CMD_SRXON: u8 = 0x03;
/// Command strobe: transmit the staged frame
const CMD_STXON: u8 = 0x04;
/// Command strobe: radio off
const CMD_SRFOFF: u8 = 0x06;
/// Command strobe: flush the RX FIFO
const CMD_SFLUSHRX: u8 = 0x08;
/// Command strobe: flush the TX FIFO
const CMD_SFLUSHTX: u8 = 0x09;

/// TX FIFO register address (write access)
const REG_TXFIFO: u8 = 0x3E;
/// RX FIFO register address
const REG_RXFIFO: u8 = 0x3F;
/// Read flag of the address byte
const REG_READ: u8 = 0x40;

/// On-air time of one byte at 250 kbit/s in microseconds
const BYTE_AIRTIME_US: u64 = 32;
/// Preamble, SFD and length byte preceding the payload on the air
const SYNC_HEADER_BYTES: u64 = 6;
/// Slack added to the computed airtime before a transmission is declared late
const TX_END_SLACK_MS: u64 = 100;

pub(crate) const fn strobe_command(command: Strobe) -> u8 {
    match command {
        Strobe::Off => CMD_SRFOFF,
        Strobe::TxOn => CMD_STXON,
        Strobe::RxOn => CMD_SRXON,
        Strobe::FlushTx => CMD_SFLUSHTX,
        Strobe::FlushRx => CMD_SFLUSHRX,
    }
}

/// Register-level transceiver behind an `embedded-hal` SPI device
///
/// # Type Parameters
/// - `SPI`: SPI device that owns the chip-select line
/// - `SFD`: frame-boundary input pin
/// - `FIFOP`: frame-pending input pin
pub struct BusTransceiver<SPI, SFD, FIFOP> {
    spi: SPI,
    sfd: SFD,
    fifop: FIFOP,
}

impl<BUS, CS, SFD, FIFOP> BusTransceiver<ExclusiveDevice<BUS, CS, Delay>, SFD, FIFOP>
where
    BUS: SpiBus,
    CS: OutputPin,
    SFD: InputPin,
    FIFOP: InputPin,
{
    /// Builds the transceiver on a raw SPI bus and a chip-select output
    ///
    /// # Returns
    /// * `Ok(BusTransceiver)` with the bus wrapped in an exclusive SPI device
    /// * `Err(TransceiverError::Pin)` if the chip-select line cannot be deasserted
    pub fn from_bus(bus: BUS, cs: CS, sfd: SFD, fifop: FIFOP) -> Result<Self, TransceiverError> {
        let spi = ExclusiveDevice::new(bus, cs, Delay).map_err(|_| TransceiverError::Pin)?;
        Ok(Self::new(spi, sfd, fifop))
    }
}

impl<SPI, SFD, FIFOP> BusTransceiver<SPI, SFD, FIFOP>
where
    SPI: SpiDevice,
    SFD: InputPin,
    FIFOP: InputPin,
{
    pub fn new(spi: SPI, sfd: SFD, fifop: FIFOP) -> Self {
        BusTransceiver { spi, sfd, fifop }
    }

    /// Gives the SPI device and pins back
    pub fn release(self) -> (SPI, SFD, FIFOP) {
        (self.spi, self.sfd, self.fifop)
    }
}

impl<SPI, SFD, FIFOP> Transceiver for BusTransceiver<SPI, SFD, FIFOP>
where
    SPI: SpiDevice,
    SFD: InputPin,
    FIFOP: InputPin,
{
    fn strobe(&mut self, command: Strobe) -> Result<(), TransceiverError> {
        log::trace!("Bus strobe {:?}", command);
        self.spi.write(&[strobe_command(command)]).map_err(|_| TransceiverError::Bus)
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransceiverError> {
        // length byte counts the trailer the front end appends
        let header = [REG_TXFIFO, (payload.len() + TRAILER_LEN) as u8];
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Write(payload)])
            .map_err(|_| TransceiverError::Bus)
    }

    fn read_rx_fifo(&mut self, buffer: &mut [u8]) -> Result<(), TransceiverError> {
        self.spi
            .transaction(&mut [Operation::Write(&[REG_RXFIFO | REG_READ]), Operation::Read(buffer)])
            .map_err(|_| TransceiverError::Bus)
    }

    fn frame_boundary(&mut self) -> bool {
        match self.sfd.is_high() {
            Ok(level) => level,
            Err(_) => {
                log::warn!("Failed to read SFD pin");
                false
            }
        }
    }

    fn frame_pending(&mut self) -> bool {
        match self.fifop.is_high() {
            Ok(level) => level,
            Err(_) => {
                log::warn!("Failed to read FIFOP pin");
                false
            }
        }
    }

    fn clear_channel(&mut self) -> bool {
        // the tag front end has no energy detector
        true
    }

    fn transmission_timeout(&self, frame_len: usize) -> Duration {
        let bytes = SYNC_HEADER_BYTES + (frame_len + TRAILER_LEN) as u64;
        Duration::from_micros(bytes * BYTE_AIRTIME_US) + Duration::from_millis(TX_END_SLACK_MS)
    }
}
