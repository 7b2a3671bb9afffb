//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Bounded-concurrency admission dispatcher."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use trex_adapter::TestAdapter;

use crate::inventory::{Inventory, TestCase, TestId};
use crate::task;

/// Notification emitted by a dispatch session towards the orchestrator.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A test case changed status; carries the post-transition snapshot.
    Status(TestCase),
    /// The session drained: admission ended and every admitted task reached
    /// its terminal status.
    Drained {
        /// Whether admission stopped because cancellation was requested.
        canceled: bool,
    },
}

/// Admits enrolled tests into concurrent execution under a fixed cap.
///
/// Admission order is the selection order. The admission loop suspends on a
/// counting semaphore while the cap is reached and wakes immediately when a
/// slot frees or cancellation is requested; it never polls. Cancellation is
/// cooperative: tests already admitted run to their natural terminal status,
/// tests not yet admitted stay `Waiting`.
pub struct Dispatcher {
    inventory: Arc<Inventory>,
    adapter: Arc<dyn TestAdapter>,
    max_concurrency: usize,
}

impl Dispatcher {
    /// Build a dispatcher over the shared inventory and adapter.
    pub fn new(
        inventory: Arc<Inventory>,
        adapter: Arc<dyn TestAdapter>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            inventory,
            adapter,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Launch one dispatch session off the caller's task.
    ///
    /// Every status transition is reported over `events` in per-test order
    /// `Waiting → Running → <terminal>`, followed by exactly one
    /// [`DispatchEvent::Drained`] once admission has ended and all spawned
    /// tasks have been awaited.
    pub fn spawn_session(
        &self,
        selection: Vec<TestId>,
        events: mpsc::UnboundedSender<DispatchEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let inventory = self.inventory.clone();
        let adapter = self.adapter.clone();
        let max_concurrency = self.max_concurrency;

        tokio::spawn(async move {
            for id in &selection {
                match inventory.mark_waiting(id) {
                    Some(case) => {
                        let _ = events.send(DispatchEvent::Status(case));
                    }
                    None => warn!(test = %id, "selection references unknown test; skipping"),
                }
            }

            let semaphore = Arc::new(Semaphore::new(max_concurrency));
            let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(selection.len());
            let mut canceled = false;

            for id in selection {
                if !inventory.contains(&id) {
                    continue;
                }
                let permit = tokio::select! {
                    biased;
                    _ = cancellation_requested(&mut cancel) => {
                        debug!(test = %id, "cancellation requested; admission stopped");
                        canceled = true;
                        break;
                    }
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let Some(case) = inventory.mark_running(&id) else {
                    continue;
                };
                debug!(test = %id, "test admitted");
                let _ = events.send(DispatchEvent::Status(case));

                let adapter = adapter.clone();
                let inventory = inventory.clone();
                let events = events.clone();
                handles.push(tokio::spawn(async move {
                    let outcome = task::execute_case(adapter, &id).await;
                    debug!(test = %id, status = %outcome.status, attempts = outcome.attempts, "test reached terminal status");
                    if let Some(case) = inventory.mark_terminal(&id, outcome.status, outcome.error)
                    {
                        let _ = events.send(DispatchEvent::Status(case));
                    }
                    drop(permit);
                }));
            }

            for handle in handles {
                if let Err(err) = handle.await {
                    error!(error = %err, "execution task join error");
                }
            }
            let _ = events.send(DispatchEvent::Drained { canceled });
        })
    }
}

/// Resolve once cancellation is requested; pend forever if the cancel handle
/// is gone (a dropped sender can no longer request cancellation).
async fn cancellation_requested(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use trex_adapter::{AdapterError, DiscoveredCase, RunError};

    use crate::inventory::ExecutionStatus;

    #[derive(Default)]
    struct Gauge {
        in_flight: usize,
        high_water: usize,
    }

    struct SleepyAdapter {
        delay: Duration,
        gauge: Mutex<Gauge>,
    }

    impl SleepyAdapter {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                gauge: Mutex::new(Gauge::default()),
            })
        }

        fn high_water(&self) -> usize {
            self.gauge.lock().high_water
        }
    }

    #[async_trait]
    impl TestAdapter for SleepyAdapter {
        fn display_name(&self) -> &str {
            "sleepy"
        }

        fn assembly_path(&self) -> &Path {
            Path::new("sleepy.dll")
        }

        fn set_assembly_path(&mut self, _path: PathBuf) {}

        fn test_method_attribute(&self) -> &str {
            "TestMethod"
        }

        fn test_method_description_attribute(&self) -> &str {
            "TestMethodDescription"
        }

        async fn discover(&self) -> Result<Vec<DiscoveredCase>, AdapterError> {
            Ok(Vec::new())
        }

        async fn run_test(&self, _case_id: &str) -> Result<(), RunError> {
            {
                let mut gauge = self.gauge.lock();
                gauge.in_flight += 1;
                gauge.high_water = gauge.high_water.max(gauge.in_flight);
            }
            tokio::time::sleep(self.delay).await;
            self.gauge.lock().in_flight -= 1;
            Ok(())
        }
    }

    fn seeded_inventory(count: usize) -> (Arc<Inventory>, Vec<TestId>) {
        let inventory = Arc::new(Inventory::new());
        let cases: Vec<TestCase> = (0..count)
            .map(|index| {
                DiscoveredCase {
                    class_name: "Suite".to_owned(),
                    method_name: format!("case_{index}"),
                    markers: Vec::new(),
                    description: String::new(),
                }
                .into()
            })
            .collect();
        let ids = cases.iter().map(|case: &TestCase| case.id.clone()).collect();
        inventory.replace(cases);
        (inventory, ids)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cap_bounds_simultaneous_executions() {
        let (inventory, ids) = seeded_inventory(8);
        let adapter = SleepyAdapter::new(Duration::from_millis(25));
        let dispatcher = Dispatcher::new(inventory, adapter.clone(), 2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let session = dispatcher.spawn_session(ids, tx, cancel_rx);

        let mut terminals = 0;
        let mut drained = false;
        while let Some(event) = rx.recv().await {
            match event {
                DispatchEvent::Status(case) if case.status.is_terminal() => terminals += 1,
                DispatchEvent::Status(_) => {}
                DispatchEvent::Drained { canceled } => {
                    assert!(!canceled);
                    drained = true;
                    break;
                }
            }
        }
        session.await.expect("session joins");
        assert!(drained);
        assert_eq!(terminals, 8);
        assert!(
            adapter.high_water() <= 2,
            "observed {} concurrent executions",
            adapter.high_water()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn admission_preserves_selection_order_under_cap_of_one() {
        let (inventory, ids) = seeded_inventory(4);
        let adapter = SleepyAdapter::new(Duration::from_millis(5));
        let dispatcher = Dispatcher::new(inventory, adapter, 1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let session = dispatcher.spawn_session(ids.clone(), tx, cancel_rx);

        let mut admitted = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                DispatchEvent::Status(case) if case.status == ExecutionStatus::Running => {
                    admitted.push(case.id);
                }
                DispatchEvent::Drained { .. } => break,
                DispatchEvent::Status(_) => {}
            }
        }
        session.await.expect("session joins");
        assert_eq!(admitted, ids);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_halts_admission_and_drains_in_flight() {
        let (inventory, ids) = seeded_inventory(6);
        let adapter = SleepyAdapter::new(Duration::from_millis(40));
        let dispatcher = Dispatcher::new(inventory.clone(), adapter, 1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let session = dispatcher.spawn_session(ids, tx, cancel_rx);

        let mut terminals = 0;
        let mut canceled_session = false;
        while let Some(event) = rx.recv().await {
            match event {
                DispatchEvent::Status(case) if case.status.is_terminal() => {
                    terminals += 1;
                    if terminals == 1 {
                        cancel_tx.send(true).expect("cancel delivered");
                    }
                }
                DispatchEvent::Status(_) => {}
                DispatchEvent::Drained { canceled } => {
                    canceled_session = canceled;
                    break;
                }
            }
        }
        session.await.expect("session joins");
        assert!(canceled_session);
        assert!(terminals < 6, "cancellation must stop admission");

        let waiting = inventory
            .snapshot()
            .into_iter()
            .filter(|case| case.status == ExecutionStatus::Waiting)
            .count();
        assert_eq!(waiting, 6 - terminals, "unadmitted tests stay Waiting");
    }
}
