//! Dual-counter concurrency governor.
//!
//! Open connections and processing sessions are counted separately: a
//! connection is admitted (or refused) right after accept, then waits for a
//! processing slot before the greeting is sent. Both counts are held by RAII
//! guards, so a session that unwinds for any reason releases them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    connections: usize,
    processings: usize,
}

/// Bounds open connections and concurrently processing sessions.
#[derive(Debug)]
pub(crate) struct Governor {
    counts: Mutex<Counts>,
    notify: Notify,
    max_processings: usize,
    max_connections: Option<usize>,
}

impl Governor {
    pub(crate) fn new(max_processings: usize, max_connections: Option<usize>) -> Self {
        Self {
            counts: Mutex::new(Counts::default()),
            notify: Notify::new(),
            max_processings,
            max_connections,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn connections(&self) -> usize {
        self.lock().connections
    }

    pub(crate) fn processings(&self) -> usize {
        self.lock().processings
    }

    /// Counts a freshly accepted connection, or returns `None` if the
    /// connection limit is reached.
    pub(crate) fn admit(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let mut counts = self.lock();
        if let Some(max) = self.max_connections
            && counts.connections >= max
        {
            return None;
        }
        counts.connections += 1;
        Some(ConnectionGuard {
            governor: Arc::clone(self),
        })
    }

    /// Waits until fewer than `max_processings` sessions are processing.
    pub(crate) async fn acquire_processing(self: &Arc<Self>) -> ProcessingGuard {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut counts = self.lock();
                if counts.processings < self.max_processings {
                    counts.processings += 1;
                    return ProcessingGuard {
                        governor: Arc::clone(self),
                    };
                }
            }
            notified.await;
        }
    }

    /// Waits until no connection is open.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.connections() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, release: impl FnOnce(&mut Counts)) {
        release(&mut self.lock());
        self.notify.notify_waiters();
    }
}

/// Holds one open-connection count.
#[derive(Debug)]
pub(crate) struct ConnectionGuard {
    governor: Arc<Governor>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.governor
            .release(|counts| counts.connections = counts.connections.saturating_sub(1));
    }
}

/// Holds one processing slot.
#[derive(Debug)]
pub(crate) struct ProcessingGuard {
    governor: Arc<Governor>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.governor
            .release(|counts| counts.processings = counts.processings.saturating_sub(1));
    }
}
