//! Concrete chat networks.

pub mod telegram;
