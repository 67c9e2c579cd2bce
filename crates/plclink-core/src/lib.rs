//! Modbus TCP wire codec used by the plclink supervisory client.
//!
//! `plclink-core` encodes and decodes the subset of Modbus PDUs a supervisory
//! client needs to poll and command a PLC (coils, discrete inputs and holding
//! registers) and frames them with the MBAP header. Decoding borrows from the
//! input buffer; nothing here allocates unless the `alloc` feature is enabled.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod encoding;
pub mod error;
pub mod frame;
pub mod pdu;

pub use error::{DecodeError, EncodeError};
