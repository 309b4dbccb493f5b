#![doc = include_str!("../README.md")]

extern crate alloc;

mod allocator;
mod buffer;
mod config;
mod error;
pub mod refill;
mod registry;
pub mod repository;
mod segment;

pub use crate::allocator::*;
pub use crate::buffer::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::refill::{CompareAndSwapRefill, MultiplySequenceRefill, RefillStrategy};
pub use crate::registry::*;
pub use crate::repository::{
    InMemorySequenceGenerator, InMemorySequenceRepository, RepositoryError, SequenceRepository,
};
pub use crate::segment::*;
