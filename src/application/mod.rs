//! Application services layer.

pub mod counts;
pub mod downloads;
pub mod error;
pub mod favorites;
pub mod flags;
pub mod jobs;
pub mod likes;
pub mod repos;
