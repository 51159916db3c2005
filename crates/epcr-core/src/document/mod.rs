//! Patch-addressable nested documents.

mod delta;
mod patch;
mod path;
mod store;

pub use delta::*;
pub use patch::*;
pub use path::*;
pub use store::*;
