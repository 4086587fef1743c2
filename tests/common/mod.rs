//! Common test utilities for block-fetch integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod transports;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use transports::*;
