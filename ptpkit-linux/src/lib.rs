//! Linux daemon pieces around the [`ptpkit`] protocol core: TOML
//! configuration, the adjtimex-backed system clock, UDP multicast transport,
//! drift persistence and the logging observer.

pub mod clock;
pub mod config;
pub mod drift;
pub mod observer;
pub mod socket;
