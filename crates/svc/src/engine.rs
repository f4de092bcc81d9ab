// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Assignment engine: probabilistic gating of feature keys and sticky
//! per-session assignments.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::SvcError;
use crate::reaper::Tracker;
use crate::session::{segment_token, SessionStore};

pub struct Engine {
    catalog: Arc<dyn Catalog>,
    sessions: Arc<dyn SessionStore>,
    tracker: Tracker,
}

impl Engine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        sessions: Arc<dyn SessionStore>,
        tracker: Tracker,
    ) -> Self {
        Self { catalog, sessions, tracker }
    }

    /// Resolve the enabled key set for one client request.
    ///
    /// A presented session ID that is still alive replays its stored
    /// assignment and re-arms the liveness marker. Anything else gets a
    /// fresh assignment: counters are read, the segment total is bumped
    /// (so the caller is part of its own denominator), over-used keys
    /// are gated off, and the result is persisted atomically under a new
    /// UUID before being handed to the reconciler.
    pub async fn code_toggles(
        &self,
        app: &str,
        version: &str,
        platform: &str,
        presented: Option<String>,
    ) -> Result<(Option<String>, Vec<String>), SvcError> {
        let app_id = self.catalog.app_id(app).await?;

        let mut keys = self.catalog.segment_keys(app_id, version, platform).await?;
        if keys.is_empty() {
            return Ok((None, Vec::new()));
        }

        if let Some(session) = presented.filter(|s| !s.is_empty()) {
            if let Some(ids) = self.sessions.session_toggles(&session).await? {
                self.sessions.refresh(&session).await?;
                keys.enable_by_id(&ids);

                return Ok((Some(session), keys.names()));
            }
        }

        let segment = segment_token(app, version, platform);

        let counts = self.sessions.key_counts(&segment, &keys).await?;
        let total = self.sessions.incr_clients(&segment).await?;

        keys.disable_by_rate(total, &counts);

        let session = uuid::Uuid::new_v4().to_string();
        let enabled = keys.enabled_ids();

        self.sessions.persist_assignment(&segment, &session, &enabled).await?;
        self.tracker.track(session.clone()).await?;

        Ok((Some(session), keys.names()))
    }

    /// Client heartbeat: re-arm the liveness marker or report the
    /// session as expired.
    pub async fn heartbeat(&self, session: &str) -> Result<(), SvcError> {
        if !self.sessions.is_alive(session).await? {
            return Err(SvcError::SessionExpired);
        }

        self.sessions.refresh(session).await
    }
}
