// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Assignment-engine scenarios over the in-memory stores: stickiness,
//! gating math, expiration, and counter conservation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use togglesvc::catalog::Catalog;
use togglesvc::error::SvcError;
use togglesvc::reaper;
use togglesvc::session::SessionStore;

use togglesvc_specs::{harness, harness_with_tracker, Harness};

const TTL: Duration = Duration::from_secs(60);

fn drain_inbox(h: &mut Harness) -> HashSet<String> {
    let mut tracked = HashSet::new();

    while let Ok(id) = h.inbox.try_recv() {
        tracked.insert(id);
    }

    tracked
}

#[tokio::test]
async fn cold_start_single_client_full_rate() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let (id, keys) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;

    let id = id.unwrap();
    assert!(!id.is_empty());
    assert_eq!(keys, vec!["ads"]);

    let segment = h.segment("demo", "1.0", "ios");
    assert_eq!(h.sessions.clients_count(&segment), 1);

    let enabled = h
        .sessions
        .session_toggles(&id)
        .await?
        .unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(h.sessions.toggle_count(&segment, enabled[0]), 1);

    Ok(())
}

#[tokio::test]
async fn represented_session_is_sticky() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0), ("chat", 1.0)]).await?;

    let (id, mut keys) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    let id = id.unwrap();
    keys.sort();

    let segment = h.segment("demo", "1.0", "ios");
    assert_eq!(h.sessions.clients_count(&segment), 1);

    for _ in 0..3 {
        let (again_id, mut again_keys) =
            h.state.engine.code_toggles("demo", "1.0", "ios", Some(id.clone())).await?;

        again_keys.sort();
        assert_eq!(again_id.unwrap(), id);
        assert_eq!(again_keys, keys);
    }

    // Replays never bump the segment counter.
    assert_eq!(h.sessions.clients_count(&segment), 1);

    Ok(())
}

#[tokio::test]
async fn half_rate_alternates_over_serialized_clients() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("beta", 0.5)]).await?;

    let mut enabled_count = 0;
    let mut pattern = Vec::new();

    for _ in 0..100 {
        let (_, keys) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;

        let on = !keys.is_empty();
        pattern.push(on);

        if on {
            enabled_count += 1;
        }
    }

    // 1st projects 1/1 > 0.5 (off), 2nd projects 1/2 (on), then strict
    // alternation.
    assert!(!pattern[0]);
    assert!(pattern[1]);
    assert_eq!(enabled_count, 50);

    let segment = h.segment("demo", "1.0", "ios");
    assert_eq!(h.sessions.clients_count(&segment), 100);

    Ok(())
}

#[tokio::test]
async fn rate_bound_holds_under_concurrency() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("beta", 0.25)]).await?;

    let clients = 80usize;
    let mut set = tokio::task::JoinSet::new();

    for _ in 0..clients {
        let state = Arc::clone(&h.state);
        set.spawn(async move {
            state.engine.code_toggles("demo", "1.0", "ios", None).await
        });
    }

    let mut enabled = 0usize;

    while let Some(joined) = set.join_next().await {
        let (_, keys) = joined??;
        if !keys.is_empty() {
            enabled += 1;
        }
    }

    // One-session overshoot is tolerated (strict-inequality race).
    let bound = (0.25 * clients as f64).ceil() as usize + 1;
    assert!(enabled <= bound, "{enabled} enabled, bound {bound}");

    Ok(())
}

#[tokio::test]
async fn expired_session_gets_fresh_id() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let (id, _) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    let id = id.unwrap();

    h.sessions.force_expire(&id);

    let (fresh, keys) =
        h.state.engine.code_toggles("demo", "1.0", "ios", Some(id.clone())).await?;

    let fresh = fresh.unwrap();
    assert_ne!(fresh, id);
    assert_eq!(keys, vec!["ads"]);

    Ok(())
}

#[tokio::test]
async fn never_seen_session_id_gets_fresh_assignment() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let ghost = uuid::Uuid::new_v4().to_string();
    let (id, _) = h.state.engine.code_toggles("demo", "1.0", "ios", Some(ghost.clone())).await?;

    assert_ne!(id.unwrap(), ghost);

    Ok(())
}

#[tokio::test]
async fn zero_rate_keys_never_assigned() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("dead", 0.0), ("live", 1.0)]).await?;

    for _ in 0..10 {
        let (id, keys) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;

        assert_eq!(keys, vec!["live"]);

        // The stored record must not carry the dead key either.
        let stored = h.sessions.session_toggles(&id.unwrap()).await?.unwrap();
        assert_eq!(stored.len(), 1);
    }

    Ok(())
}

#[tokio::test]
async fn unknown_segment_yields_empty_assignment() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let (id, keys) = h.state.engine.code_toggles("demo", "1.0", "android", None).await?;

    assert!(id.is_none());
    assert!(keys.is_empty());

    // No counters move for an empty segment.
    let segment = h.segment("demo", "1.0", "android");
    assert_eq!(h.sessions.clients_count(&segment), 0);

    Ok(())
}

#[tokio::test]
async fn unknown_app_is_rejected() {
    let h = harness(TTL);

    let err = h.state.engine.code_toggles("ghost", "1.0", "ios", None).await.unwrap_err();
    assert!(matches!(err, SvcError::NotFound));
}

#[tokio::test]
async fn heartbeat_refreshes_live_and_rejects_dead() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let (id, _) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    let id = id.unwrap();

    h.state.engine.heartbeat(&id).await?;

    h.sessions.force_expire(&id);
    let err = h.state.engine.heartbeat(&id).await.unwrap_err();
    assert!(matches!(err, SvcError::SessionExpired));

    Ok(())
}

#[tokio::test]
async fn rate_edit_does_not_touch_live_assignments() -> anyhow::Result<()> {
    let h = harness(TTL);
    let app_id = h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let (id, keys) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    let id = id.unwrap();
    assert_eq!(keys, vec!["ads"]);

    h.catalog.edit_feature(app_id, "1.0", "ios", "ads", 0.0).await?;

    // The sticky assignment survives the edit...
    let (again_id, again_keys) =
        h.state.engine.code_toggles("demo", "1.0", "ios", Some(id.clone())).await?;
    assert_eq!(again_id.unwrap(), id);
    assert_eq!(again_keys, vec!["ads"]);

    // ...while fresh clients see the key gone.
    let (_, fresh_keys) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    assert!(fresh_keys.is_empty());

    Ok(())
}

#[tokio::test]
async fn reconciliation_returns_counters_to_zero() -> anyhow::Result<()> {
    let mut h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0), ("chat", 1.0)]).await?;

    let (id, keys) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    let id = id.unwrap();
    assert_eq!(keys.len(), 2);

    let segment = h.segment("demo", "1.0", "ios");
    let stored = h.sessions.session_toggles(&id).await?.unwrap();

    assert_eq!(h.sessions.clients_count(&segment), 1);
    for &key_id in &stored {
        assert_eq!(h.sessions.toggle_count(&segment, key_id), 1);
    }

    // Liveness lapses, then a sweep reclaims the whole contribution.
    h.sessions.force_expire(&id);

    let mut tracked = drain_inbox(&mut h);
    assert!(tracked.contains(&id));

    reaper::sweep(h.sessions.as_ref(), &mut tracked).await;

    assert!(!tracked.contains(&id));
    assert!(!h.sessions.has_state(&id));
    assert_eq!(h.sessions.clients_count(&segment), 0);
    for &key_id in &stored {
        assert_eq!(h.sessions.toggle_count(&segment, key_id), 0);
    }

    Ok(())
}

#[tokio::test]
async fn counters_conserve_over_many_sessions() -> anyhow::Result<()> {
    let mut h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("a", 0.5), ("b", 1.0), ("c", 0.25)]).await?;

    let mut ids = Vec::new();

    for _ in 0..40 {
        let (id, _) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
        ids.push(id.unwrap());
    }

    for id in &ids {
        h.sessions.force_expire(id);
    }

    let mut tracked = drain_inbox(&mut h);
    assert_eq!(tracked.len(), ids.len());

    reaper::sweep(h.sessions.as_ref(), &mut tracked).await;

    assert!(tracked.is_empty());

    let segment = h.segment("demo", "1.0", "ios");
    assert_eq!(h.sessions.clients_count(&segment), 0);

    let app_id = h.catalog.app_id("demo").await?;
    for key in h.catalog.segment_keys(app_id, "1.0", "ios").await?.iter() {
        assert_eq!(h.sessions.toggle_count(&segment, key.id), 0, "key {}", key.name);
    }

    Ok(())
}

#[tokio::test]
async fn live_sessions_survive_sweeps() -> anyhow::Result<()> {
    let mut h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let (id, _) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    let id = id.unwrap();

    let mut tracked = drain_inbox(&mut h);
    reaper::sweep(h.sessions.as_ref(), &mut tracked).await;

    // Still alive: still tracked, still counted.
    assert!(tracked.contains(&id));
    let segment = h.segment("demo", "1.0", "ios");
    assert_eq!(h.sessions.clients_count(&segment), 1);

    Ok(())
}

#[tokio::test]
async fn failed_drop_is_retried_on_next_sweep() -> anyhow::Result<()> {
    let mut h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let (id, _) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    let id = id.unwrap();
    h.sessions.force_expire(&id);

    let mut tracked = drain_inbox(&mut h);

    h.sessions.set_fail_drops(true);
    reaper::sweep(h.sessions.as_ref(), &mut tracked).await;

    // Drop failed: the session stays tracked and counted.
    assert!(tracked.contains(&id));
    let segment = h.segment("demo", "1.0", "ios");
    assert_eq!(h.sessions.clients_count(&segment), 1);

    h.sessions.set_fail_drops(false);
    reaper::sweep(h.sessions.as_ref(), &mut tracked).await;

    assert!(!tracked.contains(&id));
    assert_eq!(h.sessions.clients_count(&segment), 0);

    Ok(())
}

#[tokio::test]
async fn tracker_overflow_surfaces_but_session_persists() -> anyhow::Result<()> {
    let h = harness_with_tracker(TTL, 1, Duration::from_millis(20));
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    // First assignment fills the inbox (nothing drains it).
    h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;

    let err = h.state.engine.code_toggles("demo", "1.0", "ios", None).await.unwrap_err();
    assert!(matches!(err, SvcError::TrackerOverflow));

    // Both sessions were persisted before the overflow fired.
    let segment = h.segment("demo", "1.0", "ios");
    assert_eq!(h.sessions.clients_count(&segment), 2);

    Ok(())
}

#[tokio::test]
async fn drop_session_is_idempotent() -> anyhow::Result<()> {
    let h = harness(TTL);
    h.seed("demo", "1.0", &["ios"], &[("ads", 1.0)]).await?;

    let (id, _) = h.state.engine.code_toggles("demo", "1.0", "ios", None).await?;
    let id = id.unwrap();

    h.sessions.drop_session(&id).await?;
    h.sessions.drop_session(&id).await?;

    let segment = h.segment("demo", "1.0", "ios");
    assert_eq!(h.sessions.clients_count(&segment), 0);

    Ok(())
}
