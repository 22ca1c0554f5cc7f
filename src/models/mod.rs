pub mod company;
pub mod prospect;

pub use company::*;
pub use prospect::*;
