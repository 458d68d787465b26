pub mod acquisition;
pub mod regression;

pub use acquisition::*;
pub use regression::*;
