pub mod comms;
pub mod runtime;
pub mod scheduler;
