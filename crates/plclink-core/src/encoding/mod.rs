//! Bounds-checked big-endian cursors over byte slices.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

pub(crate) use reader::{be_register, packed_bit};
