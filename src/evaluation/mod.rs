pub mod divergence;
pub mod report;

pub use divergence::*;
pub use report::*;
