#![warn(rust_2018_idioms)]

pub mod error;
pub mod interrupt;
pub mod marshal;
pub mod time;

pub use interrupt::Interrupt;
pub use marshal::{Marshal, MarshalSize, Unmarshal};
