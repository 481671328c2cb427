//! # Messages Module
//!
//! Frame types exchanged between the transport driver, the delivery task and the
//! upper layer.
//!
//! - `Frame`: payload of one radio frame, trailer excluded
//! - `ReceivedFrame`: a received `Frame` tagged with its start-of-frame timestamp

pub mod frame;

pub use frame::{Frame, ReceivedFrame};
