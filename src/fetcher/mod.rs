//! Remote block fetching -- request planning, flow control, asynchronous issuance and the
//! blocking consumer iterator.
//!
//! Split into focused submodules:
//! - [`request_builder`] - Groups per-server block lists into bounded requests
//! - [`flow_control`] - Admission of pending and deferred requests against in-flight limits
//! - [`outcome`] - Per-block results and the channel that carries them to the consumer
//! - [`shared`] - State shared between the consumer and completion threads
//! - [`driver`] - Issues requests to the transport and prepares completed blocks
//! - [`corruption`] - Eager decode check with a single refetch per block
//! - [`iterator`] - The public pull-based iterator

mod corruption;
mod driver;
mod flow_control;
mod iterator;
mod outcome;
mod request_builder;
mod shared;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_helpers;


pub use flow_control::FlowSnapshot;
pub use iterator::{FetchIterator, FetchIteratorParams, IteratorState};
pub use request_builder::{FetchPlan, RequestBuilder};
