//! Single-slot channels between a session worker and the tick handler.
//!
//! Costs flow coordinator → worker and trial requests flow worker →
//! coordinator, each through a `bounded(1)` channel, so at most one of each
//! is ever in flight.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

use lb_types::{BridgeError, BridgeResult, CostReport, TrialRequest};

/// Create a connected pair of handoff ends.
pub fn handoff() -> (CoordinatorEnd, WorkerEnd) {
    let (cost_tx, cost_rx) = bounded(1);
    let (request_tx, request_rx) = bounded(1);
    (
        CoordinatorEnd {
            costs: cost_tx,
            requests: request_rx,
        },
        WorkerEnd {
            costs: cost_rx,
            requests: request_tx,
        },
    )
}

/// The worker's side: announces requests, blocks for costs.
#[derive(Debug)]
pub struct WorkerEnd {
    costs: Receiver<CostReport>,
    requests: Sender<TrialRequest>,
}

impl WorkerEnd {
    /// Publish the trial the worker is about to wait on.
    pub fn announce(&self, request: TrialRequest) -> BridgeResult<()> {
        self.requests
            .send(request)
            .map_err(|_| BridgeError::HandoffClosed)
    }

    /// Block until the coordinator delivers a cost.
    pub fn await_cost(&self) -> BridgeResult<CostReport> {
        self.costs.recv().map_err(|_| BridgeError::HandoffClosed)
    }
}

/// The tick handler's side: collects requests, delivers costs.
#[derive(Debug)]
pub struct CoordinatorEnd {
    costs: Sender<CostReport>,
    requests: Receiver<TrialRequest>,
}

impl CoordinatorEnd {
    /// Place a cost into the slot without blocking.
    pub fn deliver(&self, report: CostReport) -> BridgeResult<()> {
        self.costs.try_send(report).map_err(|e| match e {
            TrySendError::Full(_) => BridgeError::HandoffOccupied,
            TrySendError::Disconnected(_) => BridgeError::HandoffClosed,
        })
    }

    /// Wait up to `grace` for the worker's next request. `Ok(None)` means the
    /// worker is still busy.
    pub fn next_request(&self, grace: Duration) -> BridgeResult<Option<TrialRequest>> {
        match self.requests.recv_timeout(grace) {
            Ok(request) => Ok(Some(request)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::HandoffClosed),
        }
    }

    /// Unread cost reports sitting in the slot (0 or 1).
    pub fn pending_costs(&self) -> usize {
        self.costs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_holds_at_most_one_report() {
        let (coordinator, worker) = handoff();
        coordinator.deliver(CostReport::new(1.0)).unwrap();
        assert_eq!(coordinator.pending_costs(), 1);
        assert_eq!(
            coordinator.deliver(CostReport::new(2.0)),
            Err(BridgeError::HandoffOccupied)
        );
        assert_eq!(worker.await_cost().unwrap().cost, 1.0);
        assert_eq!(coordinator.pending_costs(), 0);
    }

    #[test]
    fn test_dropped_coordinator_wakes_worker() {
        let (coordinator, worker) = handoff();
        let waiter = std::thread::spawn(move || worker.await_cost());
        drop(coordinator);
        assert_eq!(waiter.join().unwrap(), Err(BridgeError::HandoffClosed));
    }

    #[test]
    fn test_request_wait_times_out_then_sees_close() {
        let (coordinator, worker) = handoff();
        assert_eq!(
            coordinator.next_request(Duration::from_millis(20)).unwrap(),
            None
        );

        worker.announce(TrialRequest::new("s", 1, vec![0.5])).unwrap();
        let request = coordinator
            .next_request(Duration::from_millis(20))
            .unwrap()
            .unwrap();
        assert_eq!(request.trial_number, 1);

        drop(worker);
        assert_eq!(
            coordinator.next_request(Duration::from_millis(20)),
            Err(BridgeError::HandoffClosed)
        );
        assert_eq!(
            coordinator.deliver(CostReport::new(0.0)),
            Err(BridgeError::HandoffClosed)
        );
    }
}
