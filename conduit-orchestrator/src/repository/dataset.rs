//! Dataset Repository
//!
//! The dataset catalog: one row per dataset with its owner and location.

use chrono::Utc;
use conduit_core::resolver::{DatasetRow, PUBLIC_OWNER};
use sqlx::SqlitePool;

pub async fn insert(
    pool: &SqlitePool,
    id: i64,
    owner_uid: &str,
    path: &str,
) -> Result<DatasetRow, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO datasets (id, owner_uid, path, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(owner_uid)
    .bind(path)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(DatasetRow {
        id,
        owner_uid: owner_uid.to_string(),
        path: path.to_string(),
    })
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<DatasetRow>, sqlx::Error> {
    let row = sqlx::query_as::<_, DatasetRecord>(
        "SELECT id, owner_uid, path FROM datasets WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Datasets owned by `user_uid` plus public ones
pub async fn list_readable(pool: &SqlitePool, user_uid: &str) -> Result<Vec<DatasetRow>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DatasetRecord>(
        r#"
        SELECT id, owner_uid, path
        FROM datasets
        WHERE owner_uid = ? OR owner_uid = ?
        ORDER BY id ASC
        "#,
    )
    .bind(user_uid)
    .bind(PUBLIC_OWNER)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

#[derive(sqlx::FromRow)]
struct DatasetRecord {
    id: i64,
    owner_uid: String,
    path: String,
}

impl From<DatasetRecord> for DatasetRow {
    fn from(row: DatasetRecord) -> Self {
        DatasetRow {
            id: row.id,
            owner_uid: row.owner_uid,
            path: row.path,
        }
    }
}
