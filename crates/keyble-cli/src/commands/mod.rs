//! Command implementations.

mod register;

pub use register::run_register;
