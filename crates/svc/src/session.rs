// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ephemeral session tier: per-segment counters, per-session records,
//! and liveness markers with TTL.
//!
//! Key space (fixed, external tooling may inspect it):
//!
//! ```text
//! svc:clients:<segmentHash>:count         -> int, live clients in segment
//! svc:toggles:<segmentHash>:<keyID>:count -> int, live clients with key enabled
//! svc:clients:<sessionID>:state           -> base64(CBOR session record)
//! svc:clients:<sessionID>:alive           -> "1" with TTL
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::SvcError;
use crate::toggle::Keys;

const KEY_PREFIX: &str = "svc";

/// Persisted per-session record: the segment token and the key IDs that
/// were handed out as enabled. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub segment: String,
    pub toggles: Vec<i64>,
}

/// Session-store operations consumed by the assignment engine and the
/// reconciler. Atomicity of the multi-op calls is the implementer's burden.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Bump the segment's live-client counter, returning the new total.
    async fn incr_clients(&self, segment: &str) -> Result<i64, SvcError>;

    /// Current enabled-client counter per key, same order as `keys`.
    /// Missing counters read as zero.
    async fn key_counts(&self, segment: &str, keys: &Keys) -> Result<Vec<i64>, SvcError>;

    /// Atomically bump the counters for `enabled`, write the session
    /// record, and arm the liveness marker.
    async fn persist_assignment(
        &self,
        segment: &str,
        session: &str,
        enabled: &[i64],
    ) -> Result<(), SvcError>;

    /// The stored enabled-key IDs, or `None` when the liveness marker is
    /// gone, even if the record itself still lingers.
    async fn session_toggles(&self, session: &str) -> Result<Option<Vec<i64>>, SvcError>;

    /// Re-arm the liveness marker. Fails with session-expired when there
    /// is no marker left to refresh.
    async fn refresh(&self, session: &str) -> Result<(), SvcError>;

    async fn is_alive(&self, session: &str) -> Result<bool, SvcError>;

    /// Undo a session's contribution: decrement its key counters and the
    /// segment counter, then delete the record. No-op if already gone.
    async fn drop_session(&self, session: &str) -> Result<(), SvcError>;
}

// -- Key derivation -----------------------------------------------------------

const FNV_OFFSET_128: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV_PRIME_128: u128 = 0x0000000001000000000000000000013B;

/// 128-bit FNV-1a digest.
fn fnv1a_128(data: &[u8]) -> u128 {
    let mut hash = FNV_OFFSET_128;

    for &b in data {
        hash ^= u128::from(b);
        hash = hash.wrapping_mul(FNV_PRIME_128);
    }

    hash
}

/// Bounded opaque token for the (app, version, platform) segment.
pub fn segment_token(app: &str, version: &str, platform: &str) -> String {
    let digest = fnv1a_128(format!("{app}:{version}:{platform}").as_bytes());

    URL_SAFE_NO_PAD.encode(digest.to_be_bytes())
}

pub fn clients_key(segment: &str) -> String {
    format!("{KEY_PREFIX}:clients:{segment}:count")
}

pub fn toggle_key(segment: &str, key_id: i64) -> String {
    format!("{KEY_PREFIX}:toggles:{segment}:{key_id}:count")
}

pub fn state_key(session: &str) -> String {
    format!("{KEY_PREFIX}:clients:{session}:state")
}

pub fn alive_key(session: &str) -> String {
    format!("{KEY_PREFIX}:clients:{session}:alive")
}

// -- Record codec -------------------------------------------------------------

pub fn encode_state(state: &SessionState) -> Result<String, SvcError> {
    let mut buf = Vec::new();

    ciborium::into_writer(state, &mut buf).map_err(|e| SvcError::Codec(e.to_string()))?;

    Ok(URL_SAFE_NO_PAD.encode(buf))
}

pub fn decode_state(raw: &str) -> Result<SessionState, SvcError> {
    let buf = URL_SAFE_NO_PAD.decode(raw).map_err(|e| SvcError::Codec(e.to_string()))?;

    ciborium::from_reader(buf.as_slice()).map_err(|e| SvcError::Codec(e.to_string()))
}

// -- Redis implementation -----------------------------------------------------

/// Session store backed by Redis. Multi-op updates ride a MULTI/EXEC
/// pipeline so they land atomically on the shared connection.
#[derive(Clone)]
pub struct RedisSessions {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisSessions {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl SessionStore for RedisSessions {
    async fn incr_clients(&self, segment: &str) -> Result<i64, SvcError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(clients_key(segment), 1).await?;

        Ok(count)
    }

    async fn key_counts(&self, segment: &str, keys: &Keys) -> Result<Vec<i64>, SvcError> {
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();

        for key in keys.iter() {
            pipe.get(toggle_key(segment, key.id));
        }

        let counts: Vec<Option<i64>> = pipe.query_async(&mut conn).await?;

        if counts.len() != keys.len() {
            return Err(SvcError::ReplyNotFull);
        }

        Ok(counts.into_iter().map(|c| c.unwrap_or(0)).collect())
    }

    async fn persist_assignment(
        &self,
        segment: &str,
        session: &str,
        enabled: &[i64],
    ) -> Result<(), SvcError> {
        let state = SessionState { segment: segment.to_owned(), toggles: enabled.to_vec() };
        let payload = encode_state(&state)?;

        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();

        for &id in enabled {
            pipe.incr(toggle_key(segment, id), 1).ignore();
        }

        pipe.set(state_key(session), payload).ignore();
        pipe.set_ex(alive_key(session), "1", self.ttl.as_secs()).ignore();

        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn session_toggles(&self, session: &str) -> Result<Option<Vec<i64>>, SvcError> {
        if !self.is_alive(session).await? {
            return Ok(None);
        }

        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(state_key(session)).await?;

        match raw {
            Some(raw) if !raw.is_empty() => Ok(Some(decode_state(&raw)?.toggles)),
            _ => Ok(None),
        }
    }

    async fn refresh(&self, session: &str) -> Result<(), SvcError> {
        let mut conn = self.conn.clone();
        let armed: bool = conn.expire(alive_key(session), self.ttl.as_secs() as i64).await?;

        if !armed {
            return Err(SvcError::SessionExpired);
        }

        Ok(())
    }

    async fn is_alive(&self, session: &str) -> Result<bool, SvcError> {
        let mut conn = self.conn.clone();
        let alive: bool = conn.exists(alive_key(session)).await?;

        Ok(alive)
    }

    async fn drop_session(&self, session: &str) -> Result<(), SvcError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(state_key(session)).await?;

        let Some(raw) = raw else {
            return Ok(());
        };

        if raw.is_empty() {
            return Ok(());
        }

        let state = decode_state(&raw)?;

        let mut pipe = redis::pipe();
        pipe.atomic();

        for &id in &state.toggles {
            pipe.decr(toggle_key(&state.segment, id), 1).ignore();
        }

        pipe.decr(clients_key(&state.segment), 1).ignore();
        pipe.del(state_key(session)).ignore();

        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
