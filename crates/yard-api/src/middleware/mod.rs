//! Request-path middleware.

pub mod metrics;
