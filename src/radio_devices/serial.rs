//! # Serial Transceiver - Bit-Banged Tag Front End Behind a UART Bridge
//!
//! Backend for tags whose modulator is bit-banged by a companion microcontroller. The
//! driver talks to that bridge over a character-oriented UART using a small line
//! protocol, and gets exactly the same logical contract as the bus backend.
//!
//! ## Line Protocol
//!
//! Host to bridge:
//! - `r`: enable the receiver
//! - `o`: radio off
//! - `s`: send mode, followed by the outbound frame as hex pairs
//! - `\n`: start transmitting the staged frame
//!
//! Bridge to host:
//! - hex pairs followed by `\n`: one received frame
//! - `k`: the transmission has completed
//!
//! There is no length prefix; the terminating newline delimits a frame.
//!
//! ## Key Components
//!
//! - [`SerialTransceiver`]: the `Transceiver` implementation, owns the UART TX side
//! - [`SerialReceiver`]: byte-arrival state machine, owned by the UART RX interrupt
//!   (or by [`serial_rx_pump`] on platforms with an async UART)
//! - [`SerialLink`]: the acknowledgement flag shared between the two
//!
//! ## Limitations
//!
//! - No clear-channel assessment: `cca()` always reports a clear channel
//! - No frame-boundary or frame-pending signal: `receiving_packet()` and
//!   `pending_packet()` are permanently false, frames reach the delivery task
//!   through the line-complete notification instead
//! - No true edge timestamp: frames are tagged with the capture time of the newline
//! - A lost `k` is covered by a timeout proportional to the frame length

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_time::Duration;
use embedded_io::Write;

use super::{Strobe, Transceiver, TransceiverError};
use crate::frame_delivery::FrameDelivery;
use crate::timestamp_capture::{Ticks, now_ticks};
use crate::{Frame, MAX_PAYLOAD_LEN};

const CTRL_RX_ON: u8 = b'r';
const CTRL_OFF: u8 = b'o';
const CTRL_SEND_MODE: u8 = b's';
const CTRL_TX_START: u8 = b'\n';
const CTRL_TX_DONE: u8 = b'k';

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Bits per character on the wire (start, 8 data, stop)
const BITS_PER_CHAR: u64 = 10;

/// Payload bytes hex-encoded per UART write
const ENCODE_CHUNK: usize = 16;

/// Serial link parameters
#[derive(Debug, Clone, Copy)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Extra time allowed for the bridge to answer with `k`
    pub ack_margin: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baud_rate: 115_200,
            ack_margin: Duration::from_millis(20),
        }
    }
}

/// State shared between the transmit side and the byte-arrival handler
pub struct SerialLink {
    ack: AtomicBool,
}

impl Default for SerialLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink {
    pub const fn new() -> Self {
        SerialLink { ack: AtomicBool::new(false) }
    }

    fn acknowledge(&self) {
        self.ack.store(true, Ordering::Release);
    }

    fn clear_ack(&self) {
        self.ack.store(false, Ordering::Release);
    }

    /// Consumes a pending acknowledgement
    fn take_ack(&self) -> bool {
        if self.ack.load(Ordering::Acquire) {
            self.ack.store(false, Ordering::Release);
            return true;
        }
        false
    }
}

/// Transceiver reached through the UART bridge
pub struct SerialTransceiver<'a, W> {
    uart: W,
    link: &'a SerialLink,
    config: SerialConfig,
    tx_armed: bool,
}

impl<'a, W> SerialTransceiver<'a, W>
where
    W: Write,
{
    pub fn new(uart: W, link: &'a SerialLink, config: SerialConfig) -> Self {
        SerialTransceiver {
            uart,
            link,
            config,
            tx_armed: false,
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransceiverError> {
        self.uart.write_all(bytes).map_err(|_| TransceiverError::Serial)?;
        self.uart.flush().map_err(|_| TransceiverError::Serial)
    }

    fn char_time(&self) -> Duration {
        Duration::from_micros(BITS_PER_CHAR * 1_000_000 / self.config.baud_rate.max(1) as u64)
    }
}

impl<W> Transceiver for SerialTransceiver<'_, W>
where
    W: Write,
{
    fn strobe(&mut self, command: Strobe) -> Result<(), TransceiverError> {
        log::trace!("Serial strobe {:?}", command);
        match command {
            Strobe::Off => self.send(&[CTRL_OFF]),
            Strobe::RxOn => self.send(&[CTRL_RX_ON]),
            Strobe::TxOn => {
                self.link.clear_ack();
                self.send(&[CTRL_TX_START])?;
                self.tx_armed = true;
                Ok(())
            }
            // the bridge stages a single frame and replaces it on every `s`
            Strobe::FlushTx | Strobe::FlushRx => Ok(()),
        }
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransceiverError> {
        self.uart.write_all(&[CTRL_SEND_MODE]).map_err(|_| TransceiverError::Serial)?;
        let mut encoded = [0u8; ENCODE_CHUNK * 2];
        for chunk in payload.chunks(ENCODE_CHUNK) {
            let len = encode_hex(chunk, &mut encoded);
            self.uart.write_all(&encoded[..len]).map_err(|_| TransceiverError::Serial)?;
        }
        self.uart.flush().map_err(|_| TransceiverError::Serial)
    }

    fn read_rx_fifo(&mut self, _buffer: &mut [u8]) -> Result<(), TransceiverError> {
        Err(TransceiverError::NotSupported)
    }

    fn frame_boundary(&mut self) -> bool {
        false
    }

    fn frame_pending(&mut self) -> bool {
        false
    }

    fn clear_channel(&mut self) -> bool {
        true
    }

    fn transmission_started(&mut self) -> bool {
        self.tx_armed
    }

    fn transmission_ended(&mut self) -> bool {
        if self.link.take_ack() {
            self.tx_armed = false;
            return true;
        }
        false
    }

    fn transmission_timeout(&self, frame_len: usize) -> Duration {
        // `s`, two hex chars per byte and `\n` out, `k` back
        let chars = 3 + 2 * frame_len as u64;
        let wire = Duration::from_ticks(self.char_time().as_ticks() * chars);
        wire + wire + self.config.ack_margin
    }
}

/// Writes the uppercase hex encoding of `bytes` into `out`, returns the encoded length
fn encode_hex(bytes: &[u8], out: &mut [u8]) -> usize {
    let mut written = 0;
    for &byte in bytes {
        if written + 2 > out.len() {
            break;
        }
        out[written] = HEX_DIGITS[(byte >> 4) as usize];
        out[written + 1] = HEX_DIGITS[(byte & 0x0F) as usize];
        written += 2;
    }
    written
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Byte-arrival handler of the serial backend
///
/// Accumulates hex nibble pairs into the frame buffer at the receive cursor and hands
/// the frame to the delivery task when the newline arrives. Must only be driven from
/// one context. Does not block and does not log.
pub struct SerialReceiver<'a> {
    link: &'a SerialLink,
    delivery: &'a FrameDelivery,
    frame: Frame,
    high_nibble: Option<u8>,
    overflowed: bool,
}

impl<'a> SerialReceiver<'a> {
    pub const fn new(link: &'a SerialLink, delivery: &'a FrameDelivery) -> Self {
        SerialReceiver {
            link,
            delivery,
            frame: Frame::new(),
            high_nibble: None,
            overflowed: false,
        }
    }

    /// Receive cursor: bytes decoded since the last newline
    pub fn cursor(&self) -> usize {
        self.frame.length
    }

    /// Drops the line being assembled without delivering it
    pub fn discard_line(&mut self) {
        self.frame = Frame::new();
        self.high_nibble = None;
        self.overflowed = false;
    }

    /// Processes one received character captured at `now`
    pub fn on_byte(&mut self, byte: u8, now: Ticks) {
        match byte {
            b'\n' => {
                self.high_nibble = None;
                let frame = core::mem::take(&mut self.frame);
                if self.overflowed {
                    // line longer than a frame, drop it
                    self.overflowed = false;
                    return;
                }
                self.delivery.notify_line(frame, now);
            }
            CTRL_TX_DONE => self.link.acknowledge(),
            _ => {
                let Some(nibble) = hex_value(byte) else {
                    return;
                };
                match self.high_nibble.take() {
                    None => self.high_nibble = Some(nibble),
                    Some(high) => {
                        if self.frame.length < MAX_PAYLOAD_LEN {
                            self.frame.data[self.frame.length] = (high << 4) | nibble;
                            self.frame.length += 1;
                        } else {
                            self.overflowed = true;
                        }
                    }
                }
            }
        }
    }
}

/// Feeds a receiver from an async UART, for platforms without a byte interrupt hook
pub async fn serial_rx_pump<R>(mut uart: R, receiver: &mut SerialReceiver<'_>) -> !
where
    R: embedded_io_async::Read,
{
    let mut buffer = [0u8; 32];
    loop {
        match uart.read(&mut buffer).await {
            Ok(len) => {
                let now = now_ticks();
                for &byte in &buffer[..len] {
                    receiver.on_byte(byte, now);
                }
            }
            Err(_) => {
                log::warn!("Serial read error, discarding partial line");
                receiver.discard_line();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::NoEnergyAccounting;
    use crate::frame_delivery::RxEvent;
    use crate::radio_driver::{RadioDriver, TransportConfig};
    use crate::TxStatus;
    use core::convert::Infallible;
    use embassy_futures::select::select;
    use embassy_futures::yield_now;
    use embedded_io::ErrorKind;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// UART bridge that acknowledges every transmission start unless muted
    struct FakeBridge {
        link: &'static SerialLink,
        written: Vec<u8>,
        acknowledge: bool,
    }

    impl embedded_io::ErrorType for FakeBridge {
        type Error = Infallible;
    }

    impl Write for FakeBridge {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.written.extend_from_slice(buf);
            if self.acknowledge && buf.contains(&CTRL_TX_START) {
                self.link.acknowledge();
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    fn bridge(acknowledge: bool) -> (SerialTransceiver<'static, FakeBridge>, &'static SerialLink) {
        let link: &'static SerialLink = Box::leak(Box::new(SerialLink::new()));
        let uart = FakeBridge {
            link,
            written: Vec::new(),
            acknowledge,
        };
        (SerialTransceiver::new(uart, link, SerialConfig::default()), link)
    }

    #[test]
    fn encode_hex_uses_two_uppercase_chars_per_byte() {
        let mut out = [0u8; 6];
        assert_eq!(encode_hex(&[0x41, 0x0F, 0xA0], &mut out), 6);
        assert_eq!(&out, b"410FA0");
    }

    #[test]
    fn prepare_and_transmit_follow_line_protocol() {
        let (serial, _link) = bridge(true);
        let mut driver = RadioDriver::new(serial, NoEnergyAccounting, TransportConfig::default());
        driver.init().unwrap();
        driver.on().unwrap();
        driver.send(&[0x41, 0xFE]).unwrap();
        let written = driver.transceiver().uart.written.clone();
        // off at init, on, send mode + frame, start, receiver back on
        assert_eq!(written, b"ors41FE\nr".to_vec());
    }

    #[test]
    fn lost_acknowledgement_times_out_but_reports_success() {
        let (serial, _link) = bridge(false);
        let mut driver = RadioDriver::new(serial, NoEnergyAccounting, TransportConfig::default());
        driver.init().unwrap();
        assert_eq!(driver.send(&[1, 2, 3]).unwrap(), TxStatus::Ok);
    }

    #[test]
    fn transmission_timeout_is_proportional_to_length() {
        let (serial, _link) = bridge(true);
        let short = serial.transmission_timeout(1);
        let long = serial.transmission_timeout(100);
        assert!(long > short);
        assert!(short > SerialConfig::default().ack_margin);
    }

    #[test]
    fn status_signals_are_constant() {
        let (mut serial, _link) = bridge(true);
        assert!(!serial.frame_boundary());
        assert!(!serial.frame_pending());
        assert!(serial.clear_channel());
        assert_eq!(serial.read_rx_fifo(&mut [0u8; 1]), Err(TransceiverError::NotSupported));
    }

    #[test]
    fn hex_line_wakes_delivery_with_decoded_frame() {
        let link: &'static SerialLink = Box::leak(Box::new(SerialLink::new()));
        let delivery: &'static FrameDelivery = Box::leak(Box::new(FrameDelivery::new()));
        let mut receiver = SerialReceiver::new(link, delivery);

        receiver.on_byte(b'4', 10);
        receiver.on_byte(b'1', 11);
        assert_eq!(receiver.cursor(), 1);
        receiver.on_byte(b'\n', 12);
        assert_eq!(receiver.cursor(), 0);

        match delivery.try_take() {
            Some(RxEvent::Line(received)) => {
                assert_eq!(received.frame.payload(), &[0x41]);
                assert_eq!(received.timestamp, 12);
            }
            _ => panic!("expected a line-complete event"),
        }
    }

    #[test]
    fn newline_resets_nibble_phase() {
        let link: &'static SerialLink = Box::leak(Box::new(SerialLink::new()));
        let delivery: &'static FrameDelivery = Box::leak(Box::new(FrameDelivery::new()));
        let mut receiver = SerialReceiver::new(link, delivery);

        // dangling nibble before the newline must not leak into the next frame
        for &byte in b"4\nab\n" {
            receiver.on_byte(byte, 0);
        }
        match delivery.try_take() {
            Some(RxEvent::Line(received)) => assert_eq!(received.frame.payload(), &[0xAB]),
            _ => panic!("expected a line-complete event"),
        }
    }

    #[test]
    fn acknowledgement_character_sets_ack_without_touching_cursor() {
        let link: &'static SerialLink = Box::leak(Box::new(SerialLink::new()));
        let delivery: &'static FrameDelivery = Box::leak(Box::new(FrameDelivery::new()));
        let mut receiver = SerialReceiver::new(link, delivery);
        receiver.on_byte(b'4', 0);
        receiver.on_byte(b'k', 0);
        receiver.on_byte(b'2', 0);
        assert!(link.take_ack());
        assert!(!link.take_ack());
        assert_eq!(receiver.cursor(), 1);
    }

    #[test]
    fn overlong_line_is_dropped() {
        let link: &'static SerialLink = Box::leak(Box::new(SerialLink::new()));
        let delivery: &'static FrameDelivery = Box::leak(Box::new(FrameDelivery::new()));
        let mut receiver = SerialReceiver::new(link, delivery);
        for _ in 0..=MAX_PAYLOAD_LEN {
            receiver.on_byte(b'0', 0);
            receiver.on_byte(b'1', 0);
        }
        receiver.on_byte(b'\n', 0);
        assert!(delivery.try_take().is_none());
    }

    #[test]
    fn discard_line_drops_partial_frame_and_nibble() {
        let link: &'static SerialLink = Box::leak(Box::new(SerialLink::new()));
        let delivery: &'static FrameDelivery = Box::leak(Box::new(FrameDelivery::new()));
        let mut receiver = SerialReceiver::new(link, delivery);
        for &byte in b"41424" {
            receiver.on_byte(byte, 0);
        }
        receiver.discard_line();
        assert_eq!(receiver.cursor(), 0);
        assert!(delivery.try_take().is_none());

        for &byte in b"43\n" {
            receiver.on_byte(byte, 5);
        }
        match delivery.try_take() {
            Some(RxEvent::Line(received)) => assert_eq!(received.frame.payload(), &[0x43]),
            _ => panic!("expected a line-complete event"),
        }
    }

    /// Async UART replaying scripted reads, then never completing
    struct ScriptedUart {
        reads: VecDeque<Result<&'static [u8], ErrorKind>>,
    }

    impl embedded_io_async::ErrorType for ScriptedUart {
        type Error = ErrorKind;
    }

    impl embedded_io_async::Read for ScriptedUart {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                Some(Err(kind)) => Err(kind),
                None => core::future::pending().await,
            }
        }
    }

    #[test]
    fn read_error_discards_partial_line() {
        let link: &'static SerialLink = Box::leak(Box::new(SerialLink::new()));
        let delivery: &'static FrameDelivery = Box::leak(Box::new(FrameDelivery::new()));
        let mut receiver = SerialReceiver::new(link, delivery);
        let uart = ScriptedUart {
            reads: VecDeque::from([Ok(&b"4142"[..]), Err(ErrorKind::Other), Ok(&b"4"[..])]),
        };

        // the pump drains the script on its first poll, the yield ends the run
        futures::executor::block_on(select(serial_rx_pump(uart, &mut receiver), yield_now()));

        assert!(delivery.try_take().is_none());
        assert_eq!(receiver.cursor(), 0);

        // the nibble read after the error starts a fresh line
        for &byte in b"3\n" {
            receiver.on_byte(byte, 0);
        }
        match delivery.try_take() {
            Some(RxEvent::Line(received)) => assert_eq!(received.frame.payload(), &[0x43]),
            _ => panic!("expected a line-complete event"),
        }
    }
}
