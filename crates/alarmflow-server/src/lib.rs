//! Worker process around the alarm core: TOML configuration, the
//! in-memory backend set and a deterministic replay driver.

pub mod config;
pub mod replay;
