pub mod features;
pub mod labels;
pub mod tags;
pub mod utterance;

pub use features::*;
pub use labels::*;
pub use tags::*;
pub use utterance::*;
