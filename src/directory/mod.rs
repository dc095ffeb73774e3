//! Placement Directory Module
//!
//! Maps client paths to the slave and tag that hold their content. Paths are
//! write-once: the first submit wins, every later submit of the same path is
//! rejected. Slaves are chosen uniformly at random from the live set.

pub mod handlers;
pub mod placement;
pub mod protocol;
pub mod service;
pub mod types;
