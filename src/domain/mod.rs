pub mod identifiers;
pub mod order;

pub use identifiers::*;
pub use order::*;
