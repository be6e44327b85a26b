// Submodules.
mod multi;
mod term;

pub use multi::*;
pub use term::*;
