//! Player profiles from the user service

pub mod client;
pub mod directory;

pub use client::{HttpProfileClient, ProfileService};
pub use directory::ProfileDirectory;
