//! Ambient stack: configuration, logging, and the `AllocatorRuntime` that
//! ties every component together behind one encapsulated value (C9-C12).

pub mod config;
pub mod logging;
pub mod runtime;

pub use config::AllocatorConfig;
pub use runtime::AllocatorRuntime;
