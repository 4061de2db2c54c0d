//! Process bootstrap helpers that run before any subsystem starts.

pub mod logger;
