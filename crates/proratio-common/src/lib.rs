//! Shared building blocks for Proratio binaries.

pub mod logging;
