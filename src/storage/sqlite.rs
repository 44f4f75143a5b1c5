use crate::{
    error::StorageError,
    id::UnitsObjectId,
    objects::{Approval, HolderRecord, UnitId},
    snapshot::{ApprovalSnapshot, LedgerSnapshot, UnitSnapshot},
    storage_traits::SnapshotStore,
};
use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::runtime::Runtime;

/// A SQLite-backed snapshot store using sqlx.
///
/// The snapshot is stored relationally (one row per unit, holder and
/// approval) so it can be inspected with ordinary SQL. A save rewrites every
/// table inside one transaction.
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    rt: Arc<Runtime>,
    db_path: PathBuf,
}

fn read_id(row: &SqliteRow, column: &str) -> Result<UnitsObjectId, StorageError> {
    let blob: Vec<u8> = row.try_get(column)?;
    UnitsObjectId::from_slice(&blob)
        .ok_or_else(|| StorageError::Integrity(format!("{} is {} bytes, not 32", column, blob.len())))
}

// SQLite integers are signed; u64 values are stored by bit pattern.
fn to_sql(value: u64) -> i64 {
    value as i64
}

fn from_sql(value: i64) -> u64 {
    value as u64
}

impl SqliteSnapshotStore {
    /// Opens (or creates) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();
        let db_url = format!("sqlite:{}", db_path.to_string_lossy());

        // Create a runtime for async operations
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to create runtime")?;
        let rt = Arc::new(rt);

        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
        })?;

        rt.block_on(Self::initialize_schema(&pool))?;

        Ok(Self { pool, rt, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Creates the necessary tables in the database
    async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        // Single-row header of the current snapshot
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshot_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                taken_at INTEGER NOT NULL,
                paused INTEGER NOT NULL,
                commitment BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS units (
                unit_id INTEGER PRIMARY KEY,
                total_shares INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // `position` keeps the holder list in its saved order
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS holders (
                unit_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                owner BLOB NOT NULL,
                shares INTEGER NOT NULL,
                PRIMARY KEY (unit_id, position)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS approvals (
                unit_id INTEGER NOT NULL,
                holder BLOB NOT NULL,
                approved_shares INTEGER NOT NULL,
                expiry INTEGER NOT NULL,
                PRIMARY KEY (unit_id, holder)
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_units(&self) -> Result<Vec<UnitSnapshot>, StorageError> {
        let unit_rows = sqlx::query("SELECT unit_id, total_shares FROM units ORDER BY unit_id")
            .fetch_all(&self.pool)
            .await?;

        let mut units = Vec::with_capacity(unit_rows.len());
        for row in unit_rows {
            let unit_id: i64 = row.try_get("unit_id")?;
            let total_shares: i64 = row.try_get("total_shares")?;

            let holder_rows = sqlx::query(
                "SELECT owner, shares FROM holders WHERE unit_id = ? ORDER BY position",
            )
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await?;

            let mut holders = Vec::with_capacity(holder_rows.len());
            for holder in holder_rows {
                let shares: i64 = holder.try_get("shares")?;
                holders.push(HolderRecord::new(read_id(&holder, "owner")?, from_sql(shares)));
            }

            units.push(UnitSnapshot {
                unit_id: UnitId(from_sql(unit_id)),
                total_shares: from_sql(total_shares),
                holders,
            });
        }
        units.sort_by_key(|unit| unit.unit_id);
        Ok(units)
    }

    async fn load_approvals(&self) -> Result<Vec<ApprovalSnapshot>, StorageError> {
        let rows = sqlx::query("SELECT unit_id, holder, approved_shares, expiry FROM approvals")
            .fetch_all(&self.pool)
            .await?;

        let mut approvals = Vec::with_capacity(rows.len());
        for row in rows {
            let unit_id: i64 = row.try_get("unit_id")?;
            let approved_shares: i64 = row.try_get("approved_shares")?;
            let expiry: i64 = row.try_get("expiry")?;
            approvals.push(ApprovalSnapshot {
                unit_id: UnitId(from_sql(unit_id)),
                holder: read_id(&row, "holder")?,
                approval: Approval {
                    approved_shares: from_sql(approved_shares),
                    expiry: from_sql(expiry),
                },
            });
        }
        approvals.sort_by_key(|entry| (entry.unit_id, entry.holder));
        Ok(approvals)
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        self.rt.block_on(async {
            // Use a transaction so readers see the old or the new snapshot
            let mut tx = self.pool.begin().await?;

            for table in ["snapshot_meta", "units", "holders", "approvals"] {
                sqlx::query(&format!("DELETE FROM {}", table))
                    .execute(&mut *tx)
                    .await?;
            }

            sqlx::query(
                "INSERT INTO snapshot_meta (id, version, taken_at, paused, commitment)
                 VALUES (1, ?, ?, ?, ?)",
            )
            .bind(snapshot.version as i64)
            .bind(to_sql(snapshot.taken_at))
            .bind(snapshot.paused as i64)
            .bind(&snapshot.commitment[..])
            .execute(&mut *tx)
            .await?;

            for unit in &snapshot.units {
                sqlx::query("INSERT INTO units (unit_id, total_shares) VALUES (?, ?)")
                    .bind(to_sql(unit.unit_id.0))
                    .bind(to_sql(unit.total_shares))
                    .execute(&mut *tx)
                    .await?;

                for (position, record) in unit.holders.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO holders (unit_id, position, owner, shares) VALUES (?, ?, ?, ?)",
                    )
                    .bind(to_sql(unit.unit_id.0))
                    .bind(position as i64)
                    .bind(record.owner.as_ref())
                    .bind(to_sql(record.shares))
                    .execute(&mut *tx)
                    .await?;
                }
            }

            for entry in &snapshot.approvals {
                sqlx::query(
                    "INSERT INTO approvals (unit_id, holder, approved_shares, expiry)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(to_sql(entry.unit_id.0))
                .bind(entry.holder.as_ref())
                .bind(to_sql(entry.approval.approved_shares))
                .bind(to_sql(entry.approval.expiry))
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<(), StorageError>(())
        })
    }

    fn load(&self) -> Result<Option<LedgerSnapshot>, StorageError> {
        self.rt.block_on(async {
            let meta = sqlx::query(
                "SELECT version, taken_at, paused, commitment FROM snapshot_meta WHERE id = 1",
            )
            .fetch_optional(&self.pool)
            .await?;

            let Some(meta) = meta else {
                return Ok::<_, StorageError>(None);
            };

            let version: i64 = meta.try_get("version")?;
            let taken_at: i64 = meta.try_get("taken_at")?;
            let paused: i64 = meta.try_get("paused")?;
            let commitment_blob: Vec<u8> = meta.try_get("commitment")?;
            let commitment: [u8; 32] = commitment_blob.as_slice().try_into().map_err(|_| {
                StorageError::Integrity(format!(
                    "commitment is {} bytes, not 32",
                    commitment_blob.len()
                ))
            })?;

            Ok(Some(LedgerSnapshot {
                version: u32::try_from(version).map_err(|_| {
                    StorageError::Integrity(format!("invalid snapshot version {}", version))
                })?,
                taken_at: from_sql(taken_at),
                paused: paused != 0,
                units: self.load_units().await?,
                approvals: self.load_approvals().await?,
                commitment,
            }))
        })
    }
}
