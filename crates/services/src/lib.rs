#![forbid(unsafe_code)]

pub mod error;
pub mod learn_service;

pub use flashky_core::Clock;

pub use error::LearnServiceError;
pub use learn_service::{DueCard, LearnService};
