// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable feature catalog: applications, per-segment key sets, and
//! roll-out rates. Admin operations mutate it; every client assignment
//! reads it.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::error::SvcError;
use crate::toggle::{Key, Keys};

/// Catalog operations. Application and key names are case-folded to
/// lower before they touch storage.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Insert new application names. Duplicates are rejected by the
    /// store's uniqueness constraint.
    async fn add_apps(&self, apps: &[String]) -> Result<(), SvcError>;

    /// All known application names.
    async fn apps(&self) -> Result<Vec<String>, SvcError>;

    /// Numeric ID for an application name.
    async fn app_id(&self, name: &str) -> Result<i64, SvcError>;

    /// All toggle rows for a segment, in catalog order. Rows with rate 0
    /// are included; the caller decides what a zero rate means for it.
    async fn segment_keys(
        &self,
        app_id: i64,
        version: &str,
        platform: &str,
    ) -> Result<Keys, SvcError>;

    /// Create a segment per platform and seed its toggle rows. Key IDs
    /// are resolved get-or-create per application. All rows land in one
    /// transaction.
    async fn add_features(
        &self,
        app_id: i64,
        version: &str,
        platforms: &[String],
        keys: Keys,
    ) -> Result<(), SvcError>;

    /// Update the rate of one toggle row.
    async fn edit_feature(
        &self,
        app_id: i64,
        version: &str,
        platform: &str,
        key: &str,
        rate: f64,
    ) -> Result<(), SvcError>;
}

/// Catalog backed by Postgres.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn add_apps(&self, apps: &[String]) -> Result<(), SvcError> {
        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO apps(name) ");
        qb.push_values(apps, |mut row, app| {
            row.push_bind(app.to_lowercase());
        });

        qb.build().execute(&mut *tx).await?;

        tx.commit().await?;

        Ok(())
    }

    async fn apps(&self) -> Result<Vec<String>, SvcError> {
        let rows = sqlx::query("SELECT name FROM apps").fetch_all(&self.pool).await?;

        rows.iter().map(|row| Ok(row.try_get("name")?)).collect()
    }

    async fn app_id(&self, name: &str) -> Result<i64, SvcError> {
        let row = sqlx::query("SELECT id FROM apps WHERE name = $1 LIMIT 1")
            .bind(name.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("id")?),
            None => Err(SvcError::NotFound),
        }
    }

    async fn segment_keys(
        &self,
        app_id: i64,
        version: &str,
        platform: &str,
    ) -> Result<Keys, SvcError> {
        const QUERY: &str = "
SELECT
    k.id, k.key, t.rate
FROM
    apps_versions v
JOIN
    apps_features_keys k ON
        k.app_id = v.app_id
JOIN
    apps_features_toggles t ON
        t.version_id = v.id
        AND
        t.key_id = k.id
WHERE
    v.app_id = $1
    AND
    v.version = $2
    AND
    v.platform = $3
ORDER BY
    t.id
";

        let rows = sqlx::query(QUERY)
            .bind(app_id)
            .bind(version)
            .bind(platform)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Key {
                    id: row.try_get("id")?,
                    name: row.try_get("key")?,
                    rate: row.try_get("rate")?,
                })
            })
            .collect()
    }

    async fn add_features(
        &self,
        app_id: i64,
        version: &str,
        platforms: &[String],
        keys: Keys,
    ) -> Result<(), SvcError> {
        const ADD_VERSION: &str = "
INSERT INTO apps_versions
    (app_id, version, platform)
VALUES
    ($1, $2, $3)
RETURNING id";

        const ADD_TOGGLE: &str = "
INSERT INTO apps_features_toggles
    (version_id, key_id, rate)
VALUES
    ($1, $2, $3)";

        let mut tx = self.pool.begin().await?;

        // Resolve key IDs up front; the surrounding transaction keeps the
        // whole insert atomic.
        let mut key_ids = Vec::with_capacity(keys.len());

        for key in keys.iter() {
            key_ids.push(get_or_create_key(&mut tx, app_id, &key.name).await?);
        }

        for platform in platforms {
            let version_id: i64 = sqlx::query(ADD_VERSION)
                .bind(app_id)
                .bind(version)
                .bind(platform)
                .fetch_one(&mut *tx)
                .await?
                .try_get("id")?;

            for (key, &key_id) in keys.iter().zip(&key_ids) {
                sqlx::query(ADD_TOGGLE)
                    .bind(version_id)
                    .bind(key_id)
                    .bind(key.rate)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        Ok(())
    }

    async fn edit_feature(
        &self,
        app_id: i64,
        version: &str,
        platform: &str,
        key: &str,
        rate: f64,
    ) -> Result<(), SvcError> {
        const GET_TOGGLE_ID: &str = "
SELECT
    t.id
FROM
    apps_versions v
JOIN
    apps_features_keys k ON
        k.app_id = v.app_id
JOIN
    apps_features_toggles t ON
        t.version_id = v.id
        AND
        t.key_id = k.id
WHERE
    v.app_id = $1
    AND
    v.version = $2
    AND
    v.platform = $3
    AND
    k.key = $4
LIMIT 1
";

        const SET_RATE: &str = "
UPDATE apps_features_toggles
SET rate = $2, updated_at = NOW()
WHERE id = $1";

        let row = sqlx::query(GET_TOGGLE_ID)
            .bind(app_id)
            .bind(version)
            .bind(platform)
            .bind(key.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        let toggle_id: i64 = match row {
            Some(row) => row.try_get("id")?,
            None => return Err(SvcError::NotFound),
        };

        sqlx::query(SET_RATE).bind(toggle_id).bind(rate).execute(&self.pool).await?;

        Ok(())
    }
}

/// Reuse the key ID for (app, name) when it exists, insert it otherwise.
async fn get_or_create_key(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    app_id: i64,
    name: &str,
) -> Result<i64, SvcError> {
    const QUERY: &str = "
WITH new_app_key AS (
    INSERT INTO apps_features_keys
        (app_id, key)
    VALUES
        ($1, $2)
    ON CONFLICT DO NOTHING
    RETURNING id
)

SELECT id FROM new_app_key
UNION
SELECT id FROM apps_features_keys
WHERE
    app_id = $1 AND key = $2
LIMIT 1
";

    let row = sqlx::query(QUERY)
        .bind(app_id)
        .bind(name.to_lowercase())
        .fetch_one(&mut **tx)
        .await?;

    Ok(row.try_get("id")?)
}
