//! Domain models for the ePCR engine.

mod code_list;
mod field;
mod prediction;
mod value_cell;

pub use code_list::*;
pub use field::*;
pub use prediction::*;
pub use value_cell::*;
