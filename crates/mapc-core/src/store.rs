//! Latest percept snapshots.
//!
//! The session is the only writer. Readers hold a [`PerceptView`] and always
//! observe a complete snapshot (or none): each step's percept is swapped in as
//! one `Arc`, never patched in place.

use std::sync::Arc;

use mapc_proto::{DynamicPercept, SimResult, StaticPercept};
use tokio::sync::watch;

type Slot<T> = Option<Arc<T>>;

/// Write side of the snapshots, owned by the session.
#[derive(Debug)]
pub struct PerceptStore {
    static_tx: watch::Sender<Slot<StaticPercept>>,
    dynamic_tx: watch::Sender<Slot<DynamicPercept>>,
    result_tx: watch::Sender<Slot<SimResult>>,
}

impl PerceptStore {
    /// Create an empty store and a view onto it.
    pub fn new() -> (Self, PerceptView) {
        let (static_tx, static_rx) = watch::channel(None);
        let (dynamic_tx, dynamic_rx) = watch::channel(None);
        let (result_tx, result_rx) = watch::channel(None);

        let store = Self { static_tx, dynamic_tx, result_tx };
        let view = PerceptView { static_rx, dynamic_rx, result_rx };
        (store, view)
    }

    /// Another read-only view.
    pub fn view(&self) -> PerceptView {
        PerceptView {
            static_rx: self.static_tx.subscribe(),
            dynamic_rx: self.dynamic_tx.subscribe(),
            result_rx: self.result_tx.subscribe(),
        }
    }

    /// Start of a simulation: new static snapshot, no dynamic one yet.
    pub(crate) fn begin_simulation(&self, percept: StaticPercept) {
        self.dynamic_tx.send_replace(None);
        self.static_tx.send_replace(Some(Arc::new(percept)));
    }

    pub(crate) fn replace_dynamic(&self, percept: Arc<DynamicPercept>) {
        self.dynamic_tx.send_replace(Some(percept));
    }

    pub(crate) fn record_result(&self, result: SimResult) {
        self.result_tx.send_replace(Some(Arc::new(result)));
    }

    /// Step of the current dynamic snapshot.
    pub fn step(&self) -> Option<u64> {
        self.dynamic_tx.borrow().as_ref().map(|percept| percept.step())
    }
}

/// Read-only access to the latest snapshots.
#[derive(Debug, Clone)]
pub struct PerceptView {
    static_rx: watch::Receiver<Slot<StaticPercept>>,
    dynamic_rx: watch::Receiver<Slot<DynamicPercept>>,
    result_rx: watch::Receiver<Slot<SimResult>>,
}

impl PerceptView {
    /// Static percept of the current (or last) simulation.
    pub fn static_percept(&self) -> Option<Arc<StaticPercept>> {
        self.static_rx.borrow().clone()
    }

    /// Most recent dynamic percept of the current simulation.
    pub fn dynamic_percept(&self) -> Option<Arc<DynamicPercept>> {
        self.dynamic_rx.borrow().clone()
    }

    /// Result of the most recently ended simulation.
    pub fn sim_result(&self) -> Option<Arc<SimResult>> {
        self.result_rx.borrow().clone()
    }

    /// Step index of the most recent dynamic percept.
    pub fn step(&self) -> Option<u64> {
        self.dynamic_rx.borrow().as_ref().map(|percept| percept.step())
    }

    /// Wait until a new dynamic percept replaces the one last seen by this
    /// view.
    ///
    /// Returns `None` once the session is gone.
    pub async fn changed(&mut self) -> Option<Arc<DynamicPercept>> {
        loop {
            self.dynamic_rx.changed().await.ok()?;
            if let Some(percept) = self.dynamic_rx.borrow_and_update().clone() {
                return Some(percept);
            }
        }
    }

    /// The current dynamic percept, waiting for one if there is none yet.
    ///
    /// Returns `None` if the session is gone before any percept arrived.
    pub async fn current(&mut self) -> Option<Arc<DynamicPercept>> {
        self.dynamic_rx.wait_for(Option::is_some).await.ok()?.clone()
    }

    /// Wait for the first dynamic percept newer than the current one.
    ///
    /// Returns `None` once the session is gone.
    pub async fn next_step(&mut self) -> Option<Arc<DynamicPercept>> {
        let _ = self.dynamic_rx.borrow_and_update();
        self.changed().await
    }
}
