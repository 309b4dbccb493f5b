mod cas;
mod interface;
mod loader;
mod multiply;

pub use cas::*;
pub use interface::*;
pub use loader::*;
pub use multiply::*;
