//! CLI Commands

pub mod clean;
pub mod record;
pub mod render;
pub mod serve;
pub mod summary;
