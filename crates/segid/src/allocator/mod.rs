#[allow(clippy::module_inception)]
mod allocator;
mod coordinator;
mod pool;
mod status;

pub use allocator::*;
pub use pool::*;
pub use status::*;
