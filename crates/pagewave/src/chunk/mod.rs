mod error;
mod interface;
mod runner;

pub use error::*;
pub use interface::*;
pub use runner::*;
