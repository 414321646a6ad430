//! Route handlers, one module per resource.

pub mod runs;
pub mod train;
