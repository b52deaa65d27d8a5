pub mod layers;
pub mod matcher;
pub mod preprocessing;
pub mod summary;
