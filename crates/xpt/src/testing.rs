//! In-memory transport for driving the engine in tests
//!
//! [`MockTransport`] records every call and keeps submitted requests
//! until the test answers them. [`run_until_idle`] answers them from a
//! closure until nothing is outstanding.

use crate::engine::Xpt;
use crate::error::{Result, XptError};
use crate::notify::Notifier;
use crate::transport::Transport;
use protocol::{BusId, Completion, DevicePath, PathCapability, Request, TransportParams};
use std::collections::{HashMap, VecDeque};

/// One call made by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Submit(Request),
    Freeze {
        path: DevicePath,
        count: u32,
    },
    Release {
        path: DevicePath,
        count: u32,
        run_now: bool,
    },
    SetParams {
        path: DevicePath,
        params: TransportParams,
    },
}

#[derive(Debug, Default)]
pub struct MockTransport {
    capabilities: HashMap<BusId, PathCapability>,
    outstanding: VecDeque<Request>,
    pub calls: Vec<TransportCall>,
    /// Reject every submit, as a transport whose queue is gone would
    pub refuse_submits: bool,
    /// Submits rejected so far
    pub refused: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(mut self, bus: BusId, capability: PathCapability) -> Self {
        self.capabilities.insert(bus, capability);
        self
    }

    /// Requests submitted and not yet answered, oldest first
    pub fn outstanding(&self) -> &VecDeque<Request> {
        &self.outstanding
    }

    /// Take the oldest unanswered request
    pub fn next_request(&mut self) -> Option<Request> {
        self.outstanding.pop_front()
    }

    /// Every request ever submitted
    pub fn submitted(&self) -> impl Iterator<Item = &Request> {
        self.calls.iter().filter_map(|call| match call {
            TransportCall::Submit(request) => Some(request),
            _ => None,
        })
    }

    pub fn releases(&self, path: DevicePath) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, TransportCall::Release { path: p, .. } if *p == path))
            .count()
    }

    pub fn freezes(&self, path: DevicePath) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, TransportCall::Freeze { path: p, .. } if *p == path))
            .count()
    }

    /// Settings pushed for `path`, in order
    pub fn params_for(&self, path: DevicePath) -> Vec<TransportParams> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::SetParams { path: p, params } if *p == path => Some(*params),
                _ => None,
            })
            .collect()
    }
}

impl Transport for MockTransport {
    fn submit(&mut self, request: Request) -> Result<()> {
        if self.refuse_submits {
            self.refused += 1;
            return Err(XptError::Transport("submit queue closed".to_string()));
        }
        self.calls.push(TransportCall::Submit(request.clone()));
        self.outstanding.push_back(request);
        Ok(())
    }

    fn path_capability(&self, bus: BusId) -> Result<PathCapability> {
        self.capabilities
            .get(&bus)
            .copied()
            .ok_or(XptError::UnknownBus(bus))
    }

    fn freeze_queue(&mut self, path: DevicePath, count: u32) {
        self.calls.push(TransportCall::Freeze { path, count });
    }

    fn release_queue(&mut self, path: DevicePath, count: u32, run_now: bool) {
        self.calls.push(TransportCall::Release {
            path,
            count,
            run_now,
        });
    }

    fn set_transport_params(&mut self, path: DevicePath, params: TransportParams) {
        self.calls.push(TransportCall::SetParams { path, params });
    }
}

/// Answer outstanding requests with `respond` until none are left
///
/// Panics after `limit` completions so a test that loops forever fails.
pub fn run_until_idle<N, F>(xpt: &mut Xpt<MockTransport, N>, limit: usize, mut respond: F) -> usize
where
    N: Notifier,
    F: FnMut(&Request) -> Completion,
{
    let mut answered = 0;
    while let Some(request) = xpt.transport_mut().next_request() {
        assert!(answered < limit, "more than {} completions", limit);
        let completion = respond(&request);
        xpt.complete(completion);
        answered += 1;
    }
    answered
}
