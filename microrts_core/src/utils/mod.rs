// Utils module - filesystem layout helpers
pub mod directory_utils;

pub use directory_utils::*;
