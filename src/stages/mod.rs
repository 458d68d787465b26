pub mod stage0_index;
pub mod stage1_encode;
pub mod stage2_group;
pub mod stage3_train;
pub mod stage4_annotate;

pub use stage0_index::*;
pub use stage1_encode::*;
pub use stage2_group::*;
pub use stage3_train::*;
pub use stage4_annotate::*;
