//! Poll-based status watching.

use std::collections::BTreeSet;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use qd_core::{TickControl, Ticker};

use crate::adapter::{CalculationResults, PlatformAdapter, PlatformReply, ProcessStatus};
use crate::engine::ProcessId;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    StatusUpdated(ProcessStatus),
    /// Terminal state reached; the process is no longer watched.
    Finished {
        status: ProcessStatus,
        results: PlatformReply<CalculationResults>,
    },
    /// Status lookup failed; the process is no longer watched.
    Error { pk: ProcessId, message: String },
}

type WatchSet = Arc<Mutex<BTreeSet<ProcessId>>>;

pub struct StatusMonitor {
    watched: WatchSet,
    ticker: Ticker,
}

impl StatusMonitor {
    /// Start polling. Events arrive on the returned receiver; dropping it
    /// ends the polling thread at its next tick.
    pub fn start(
        adapter: Arc<PlatformAdapter>,
        interval: Duration,
    ) -> io::Result<(Self, Receiver<MonitorEvent>)> {
        let (tx, rx) = mpsc::channel();
        let watched: WatchSet = Arc::new(Mutex::new(BTreeSet::new()));
        let set = Arc::clone(&watched);
        let ticker = Ticker::spawn("qd-status-monitor", interval, move || {
            poll_once(&adapter, &set, &tx)
        })?;
        Ok((Self { watched, ticker }, rx))
    }

    pub fn watch(&self, pk: ProcessId) {
        lock(&self.watched).insert(pk);
    }

    pub fn unwatch(&self, pk: ProcessId) {
        lock(&self.watched).remove(&pk);
    }

    pub fn watched(&self) -> Vec<ProcessId> {
        lock(&self.watched).iter().copied().collect()
    }

    pub fn is_running(&self) -> bool {
        !self.ticker.is_finished()
    }

    /// Signal the polling thread and join it.
    pub fn stop(self) {
        self.ticker.stop();
    }
}

fn lock(set: &WatchSet) -> std::sync::MutexGuard<'_, BTreeSet<ProcessId>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

fn poll_once(adapter: &PlatformAdapter, set: &WatchSet, tx: &Sender<MonitorEvent>) -> TickControl {
    let snapshot: Vec<ProcessId> = lock(set).iter().copied().collect();
    for pk in snapshot {
        let event = match adapter.get_calculation_status(pk) {
            PlatformReply::Error { error } => {
                lock(set).remove(&pk);
                MonitorEvent::Error { pk, message: error }
            }
            PlatformReply::Ok(status) if status.state.is_terminal() => {
                lock(set).remove(&pk);
                let results = adapter.get_calculation_results(pk);
                MonitorEvent::Finished { status, results }
            }
            PlatformReply::Ok(status) => MonitorEvent::StatusUpdated(status),
        };
        if tx.send(event).is_err() {
            tracing::debug!("monitor receiver dropped, stopping");
            return TickControl::Stop;
        }
    }
    TickControl::Continue
}
