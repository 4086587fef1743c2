//! Flow control -- decides which pending requests may be issued given the in-flight limits.
//!
//! Requests that fit the global byte/request budget but would push a server over its per-address
//! block limit are parked in that server's deferred queue instead of blocking the pipeline.

use std::collections::{HashMap, VecDeque};

use crate::config::FetchConfig;
use crate::types::{FetchRequest, ServerAddress};

/// Global and per-server in-flight limits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FlowLimits {
    pub(crate) max_bytes_in_flight: u64,
    pub(crate) max_reqs_in_flight: usize,
    pub(crate) max_blocks_in_flight_per_address: usize,
}

impl From<&FetchConfig> for FlowLimits {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_bytes_in_flight: config.max_bytes_in_flight,
            max_reqs_in_flight: config.max_reqs_in_flight,
            max_blocks_in_flight_per_address: config.max_blocks_in_flight_per_address,
        }
    }
}

/// Point-in-time view of the flow-control counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowSnapshot {
    /// Advertised bytes issued but not yet consumed
    pub bytes_in_flight: u64,
    /// Requests issued whose last block has not been consumed
    pub reqs_in_flight: usize,
    /// Blocks issued but not yet consumed, per server
    pub blocks_in_flight_per_address: HashMap<ServerAddress, usize>,
    /// Requests not yet considered for issuance
    pub pending_requests: usize,
    /// Requests parked because their server was at its block limit
    pub deferred_requests: usize,
}

/// Pending queue, deferred backlog and in-flight counters.
///
/// Always accessed under the fetch iterator's single state lock.
#[derive(Debug)]
pub(crate) struct FlowState {
    limits: FlowLimits,
    pending: VecDeque<FetchRequest>,
    deferred: HashMap<ServerAddress, VecDeque<FetchRequest>>,
    bytes_in_flight: u64,
    reqs_in_flight: usize,
    blocks_in_flight_per_address: HashMap<ServerAddress, usize>,
}

impl FlowState {
    pub(crate) fn new(limits: FlowLimits, requests: Vec<FetchRequest>) -> Self {
        Self {
            limits,
            pending: requests.into(),
            deferred: HashMap::new(),
            bytes_in_flight: 0,
            reqs_in_flight: 0,
            blocks_in_flight_per_address: HashMap::new(),
        }
    }

    /// Global admission check.
    ///
    /// An idle pipeline always admits, even a request larger than the whole byte budget,
    /// otherwise such a request could never be fetched.
    fn can_admit(&self, request: &FetchRequest) -> bool {
        self.bytes_in_flight == 0
            || (self.reqs_in_flight < self.limits.max_reqs_in_flight
                && self.bytes_in_flight.saturating_add(request.size())
                    <= self.limits.max_bytes_in_flight)
    }

    /// Per-server admission check
    fn address_has_room(&self, request: &FetchRequest) -> bool {
        self.blocks_in_flight(request.address()).saturating_add(request.len())
            <= self.limits.max_blocks_in_flight_per_address
    }

    fn mark_issued(&mut self, request: &FetchRequest) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_add(request.size());
        self.reqs_in_flight += 1;
        *self
            .blocks_in_flight_per_address
            .entry(request.address().clone())
            .or_insert(0) += request.len();
    }

    /// Remove every request that may be issued now, updating the counters for each.
    ///
    /// Deferred requests go first, in FIFO order per server. Pending requests follow until one
    /// fails the global check; those blocked only by their server's limit are deferred.
    pub(crate) fn take_admissible(&mut self) -> Vec<FetchRequest> {
        let mut issued = Vec::new();

        let addresses: Vec<ServerAddress> = self.deferred.keys().cloned().collect();
        for address in addresses {
            while let Some(front) = self.deferred.get(&address).and_then(|q| q.front()) {
                if !(self.can_admit(front) && self.address_has_room(front)) {
                    break;
                }
                let Some(request) = self.deferred.get_mut(&address).and_then(|q| q.pop_front())
                else {
                    break;
                };
                tracing::debug!(
                    address = %address,
                    blocks = request.len(),
                    bytes = request.size(),
                    "Issuing deferred fetch request"
                );
                self.mark_issued(&request);
                issued.push(request);
            }
            if self.deferred.get(&address).is_some_and(|q| q.is_empty()) {
                self.deferred.remove(&address);
            }
        }

        while let Some(front) = self.pending.front() {
            if !self.can_admit(front) {
                break;
            }
            let Some(request) = self.pending.pop_front() else {
                break;
            };

            // Older deferred requests for the same server keep their place in line
            let behind_deferred = self.deferred.contains_key(request.address());
            if !behind_deferred && self.address_has_room(&request) {
                self.mark_issued(&request);
                issued.push(request);
            } else {
                tracing::debug!(
                    address = %request.address(),
                    blocks = request.len(),
                    in_flight = self.blocks_in_flight(request.address()),
                    "Server at its block limit, deferring fetch request"
                );
                self.deferred
                    .entry(request.address().clone())
                    .or_default()
                    .push_back(request);
            }
        }

        issued
    }

    /// Queue a request behind everything already pending
    pub(crate) fn enqueue(&mut self, request: FetchRequest) {
        self.pending.push_back(request);
    }

    /// Release the accounting for one consumed remote block
    pub(crate) fn block_consumed(
        &mut self,
        address: &ServerAddress,
        size_hint: u64,
        is_last_of_request: bool,
    ) {
        if let Some(count) = self.blocks_in_flight_per_address.get_mut(address) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.blocks_in_flight_per_address.remove(address);
            }
        }
        if is_last_of_request {
            self.reqs_in_flight = self.reqs_in_flight.saturating_sub(1);
        }
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(size_hint);
    }

    pub(crate) fn blocks_in_flight(&self, address: &ServerAddress) -> usize {
        self.blocks_in_flight_per_address
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            bytes_in_flight: self.bytes_in_flight,
            reqs_in_flight: self.reqs_in_flight,
            blocks_in_flight_per_address: self.blocks_in_flight_per_address.clone(),
            pending_requests: self.pending.len(),
            deferred_requests: self.deferred.values().map(VecDeque::len).sum(),
        }
    }
}
