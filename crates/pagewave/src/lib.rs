#![doc = include_str!("../README.md")]

mod cache;
mod chunk;
mod dedup;
mod queue;

pub use crate::cache::*;
pub use crate::chunk::*;
pub use crate::dedup::*;
pub use crate::queue::*;
