// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background reconciler: un-counts sessions whose liveness marker has
//! expired so the segment rate math stays honest over time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SvcError;
use crate::session::SessionStore;

/// Producer half of the reconciler inbox. Handed a session ID right
/// after a successful assignment; waits at most `deadline` for inbox
/// space so a slow reconciler never stalls the hot path.
#[derive(Clone)]
pub struct Tracker {
    tx: mpsc::Sender<String>,
    deadline: Duration,
}

impl Tracker {
    pub fn new(tx: mpsc::Sender<String>, deadline: Duration) -> Self {
        Self { tx, deadline }
    }

    pub async fn track(&self, session: String) -> Result<(), SvcError> {
        match tokio::time::timeout(self.deadline, self.tx.send(session)).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(SvcError::TrackerOverflow),
        }
    }
}

/// Spawn the reconciler task and return the producer handle.
///
/// The task owns its tracking set outright; producers only talk to it
/// through the bounded channel. On shutdown it exits immediately,
/// leaving unreclaimed sessions to TTL expiry.
pub fn spawn(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    capacity: usize,
    deadline: Duration,
    shutdown: CancellationToken,
) -> Tracker {
    let (tx, mut rx) = mpsc::channel::<String>(capacity);

    tokio::spawn(async move {
        let mut tracked: HashSet<String> = HashSet::new();

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                session = rx.recv() => match session {
                    Some(session) => {
                        tracked.insert(session);
                    }
                    None => break,
                },
                _ = timer.tick() => {
                    sweep(store.as_ref(), &mut tracked).await;
                }
            }
        }

        tracing::debug!(tracked = tracked.len(), "reconciler stopped");
    });

    Tracker::new(tx, deadline)
}

/// One reconciliation pass over the tracked set.
///
/// Live sessions stay tracked. Dead ones are dropped from the store and
/// untracked; a failed drop stays tracked so the next sweep retries it.
pub async fn sweep(store: &dyn SessionStore, tracked: &mut HashSet<String>) {
    let sessions: Vec<String> = tracked.iter().cloned().collect();

    for session in sessions {
        match store.is_alive(&session).await {
            Ok(true) => {}
            Ok(false) => match store.drop_session(&session).await {
                Ok(()) => {
                    tracked.remove(&session);
                }
                Err(e) => {
                    tracing::warn!(session = %session, err = %e, "session drop failed");
                }
            },
            Err(e) => {
                tracing::warn!(session = %session, err = %e, "liveness check failed");
            }
        }
    }
}
