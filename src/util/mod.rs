//! Utility functions
//!
//! Pure helpers - time formatting, randomization.

pub mod rand;
pub mod time;
