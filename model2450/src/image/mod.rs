//! Firmware image formats.

pub mod ihex;

pub use ihex::{FlashImage, HexRecord, HexStats, validate};
