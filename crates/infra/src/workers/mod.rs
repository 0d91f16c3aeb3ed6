//! Background workers.

pub mod projection_worker;
