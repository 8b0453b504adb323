use crate::charges::{Charge, ChargeEvent, ChargeStatus, GatewayAccount, Refund, RefundStatus};
use crate::database::charge_store::{
    ChargeStore, RefundStatusChange, StatusChange, StoreResult, SweepQuery,
};
use crate::database::error::DatabaseError;
use crate::payments::types::GatewayName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

const CHARGE_COLUMNS: &str = "id, external_id, amount, status, gateway_account_id, \
     gateway_transaction_id, reference, description, delayed_capture, version, created_at, updated_at";

const REFUND_COLUMNS: &str =
    "id, external_id, charge_id, amount, status, gateway_reference, version, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct ChargeRow {
    id: Uuid,
    external_id: String,
    amount: i64,
    status: String,
    gateway_account_id: i64,
    gateway_transaction_id: Option<String>,
    reference: String,
    description: String,
    delayed_capture: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChargeRow> for Charge {
    type Error = DatabaseError;

    fn try_from(row: ChargeRow) -> Result<Self, Self::Error> {
        Ok(Charge {
            status: ChargeStatus::from_str(&row.status).map_err(|e| DatabaseError::Decode {
                message: e.to_string(),
            })?,
            id: row.id,
            external_id: row.external_id,
            amount: row.amount,
            gateway_account_id: row.gateway_account_id,
            gateway_transaction_id: row.gateway_transaction_id,
            reference: row.reference,
            description: row.description,
            delayed_capture: row.delayed_capture,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct ChargeEventRow {
    charge_id: Uuid,
    status: String,
    gateway_event_date: Option<DateTime<Utc>>,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct RefundRow {
    id: Uuid,
    external_id: String,
    charge_id: Uuid,
    amount: i64,
    status: String,
    gateway_reference: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RefundRow> for Refund {
    type Error = DatabaseError;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        Ok(Refund {
            status: RefundStatus::from_str(&row.status).map_err(|e| DatabaseError::Decode {
                message: e.to_string(),
            })?,
            id: row.id,
            external_id: row.external_id,
            charge_id: row.charge_id,
            amount: row.amount,
            gateway_reference: row.gateway_reference,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct GatewayAccountRow {
    id: i64,
    gateway: String,
    credentials: Json<HashMap<String, String>>,
    live: bool,
}

fn decode_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Postgres-backed `ChargeStore`. Every durable step runs in its own
/// transaction; version checks are `UPDATE ... WHERE version = $n`.
#[derive(Clone)]
pub struct PgChargeStore {
    pool: PgPool,
}

impl PgChargeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn charge_exists(&self, charge_id: Uuid) -> StoreResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM charges WHERE id = $1")
            .bind(charge_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(found.is_some())
    }

    async fn stale_or_missing(&self, charge: &Charge) -> DatabaseError {
        match self.charge_exists(charge.id).await {
            Ok(true) => DatabaseError::Conflict {
                entity: "charge",
                id: charge.external_id.clone(),
            },
            Ok(false) => DatabaseError::NotFound {
                entity: "charge",
                id: charge.external_id.clone(),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl ChargeStore for PgChargeStore {
    async fn insert_charge(&self, charge: Charge) -> StoreResult<Charge> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let row = sqlx::query_as::<_, ChargeRow>(&format!(
            "INSERT INTO charges ({CHARGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {CHARGE_COLUMNS}"
        ))
        .bind(charge.id)
        .bind(&charge.external_id)
        .bind(charge.amount)
        .bind(charge.status.as_str())
        .bind(charge.gateway_account_id)
        .bind(&charge.gateway_transaction_id)
        .bind(&charge.reference)
        .bind(&charge.description)
        .bind(charge.delayed_capture)
        .bind(charge.version)
        .bind(charge.created_at)
        .bind(charge.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query("INSERT INTO charge_events (charge_id, status, recorded_at) VALUES ($1, $2, $3)")
            .bind(charge.id)
            .bind(charge.status.as_str())
            .bind(charge.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Charge::try_from(row)
    }

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Charge>> {
        sqlx::query_as::<_, ChargeRow>(&format!(
            "SELECT {CHARGE_COLUMNS} FROM charges WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Charge::try_from)
        .transpose()
    }

    async fn find_by_gateway_transaction_id(
        &self,
        gateway: GatewayName,
        transaction_id: &str,
    ) -> StoreResult<Option<Charge>> {
        let columns = CHARGE_COLUMNS
            .split(", ")
            .map(|c| format!("c.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query_as::<_, ChargeRow>(&format!(
            "SELECT {columns} FROM charges c \
             JOIN gateway_accounts a ON a.id = c.gateway_account_id \
             WHERE c.gateway_transaction_id = $1 AND a.gateway = $2"
        ))
        .bind(transaction_id)
        .bind(gateway.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Charge::try_from)
        .transpose()
    }

    async fn reload(&self, charge_id: Uuid) -> StoreResult<Charge> {
        let row = sqlx::query_as::<_, ChargeRow>(&format!(
            "SELECT {CHARGE_COLUMNS} FROM charges WHERE id = $1"
        ))
        .bind(charge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or(DatabaseError::NotFound {
            entity: "charge",
            id: charge_id.to_string(),
        })?;
        Charge::try_from(row)
    }

    async fn commit_status_change(
        &self,
        charge: &Charge,
        change: StatusChange,
    ) -> StoreResult<Charge> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let updated = sqlx::query_as::<_, ChargeRow>(&format!(
            "UPDATE charges \
             SET status = $3, \
                 gateway_transaction_id = COALESCE($4, gateway_transaction_id), \
                 version = version + 1, \
                 updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING {CHARGE_COLUMNS}"
        ))
        .bind(charge.id)
        .bind(charge.version)
        .bind(change.to.as_str())
        .bind(&change.gateway_transaction_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(row) = updated else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(self.stale_or_missing(charge).await);
        };

        sqlx::query(
            "INSERT INTO charge_events (charge_id, status, gateway_event_date, recorded_at) \
             VALUES ($1, $2, $3, NOW())",
        )
        .bind(charge.id)
        .bind(change.to.as_str())
        .bind(change.gateway_event_date)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Charge::try_from(row)
    }

    async fn find_events(&self, charge_id: Uuid) -> StoreResult<Vec<ChargeEvent>> {
        let rows = sqlx::query_as::<_, ChargeEventRow>(
            "SELECT charge_id, status, gateway_event_date, recorded_at \
             FROM charge_events WHERE charge_id = $1 ORDER BY id",
        )
        .bind(charge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter()
            .map(|row| {
                Ok(ChargeEvent {
                    status: ChargeStatus::from_str(&row.status).map_err(|e| {
                        DatabaseError::Decode {
                            message: e.to_string(),
                        }
                    })?,
                    charge_id: row.charge_id,
                    gateway_event_date: row.gateway_event_date,
                    recorded_at: row.recorded_at,
                })
            })
            .collect()
    }

    async fn find_eligible_for_sweep(&self, query: &SweepQuery) -> StoreResult<Vec<Charge>> {
        let statuses: Vec<&str> = query.statuses.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query_as::<_, ChargeRow>(&format!(
            "SELECT {CHARGE_COLUMNS} FROM charges \
             WHERE status = ANY($1) AND created_at < $2 \
             ORDER BY created_at ASC \
             LIMIT $3"
        ))
        .bind(&statuses)
        .bind(query.created_before)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        decode_all(rows)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn find_gateway_account(&self, account_id: i64) -> StoreResult<Option<GatewayAccount>> {
        let row = sqlx::query_as::<_, GatewayAccountRow>(
            "SELECT id, gateway, credentials, live FROM gateway_accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(|row| {
            Ok(GatewayAccount {
                gateway: GatewayName::from_str(&row.gateway).map_err(|e| {
                    DatabaseError::Decode {
                        message: e.to_string(),
                    }
                })?,
                id: row.id,
                credentials: row.credentials.0,
                live: row.live,
            })
        })
        .transpose()
    }

    async fn insert_refund(&self, charge: &Charge, refund: Refund) -> StoreResult<Refund> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let bumped = sqlx::query(
            "UPDATE charges SET version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2",
        )
        .bind(charge.id)
        .bind(charge.version)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if bumped.rows_affected() == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(self.stale_or_missing(charge).await);
        }

        let row = sqlx::query_as::<_, RefundRow>(&format!(
            "INSERT INTO refunds ({REFUND_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {REFUND_COLUMNS}"
        ))
        .bind(refund.id)
        .bind(&refund.external_id)
        .bind(refund.charge_id)
        .bind(refund.amount)
        .bind(refund.status.as_str())
        .bind(&refund.gateway_reference)
        .bind(refund.version)
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Refund::try_from(row)
    }

    async fn find_refunds_for_charge(&self, charge_id: Uuid) -> StoreResult<Vec<Refund>> {
        let rows = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE charge_id = $1 ORDER BY created_at"
        ))
        .bind(charge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        decode_all(rows)
    }

    async fn commit_refund_status_change(
        &self,
        refund: &Refund,
        change: RefundStatusChange,
    ) -> StoreResult<Refund> {
        let row = sqlx::query_as::<_, RefundRow>(&format!(
            "UPDATE refunds \
             SET status = $3, \
                 gateway_reference = COALESCE($4, gateway_reference), \
                 version = version + 1, \
                 updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING {REFUND_COLUMNS}"
        ))
        .bind(refund.id)
        .bind(refund.version)
        .bind(change.to.as_str())
        .bind(&change.gateway_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or(DatabaseError::Conflict {
            entity: "refund",
            id: refund.external_id.clone(),
        })?;
        Refund::try_from(row)
    }
}
