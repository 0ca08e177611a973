// Postgres persistence for parsed records. Every write is an idempotent upsert
// on the record's natural key.

use capitol_common::{Bill, Chamber, Legislator, Vote};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::metrics::MetricsSink;

pub struct Database {
    pool: PgPool,
}

/// What happened to one batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub upserted: usize,
    pub failed: usize,
    /// Records with no complete natural key (unknown congress or chamber).
    pub skipped: usize,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.upserted += other.upserted;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TableCounts {
    pub bills: i64,
    pub votes: i64,
    pub legislators: i64,
}

impl Database {
    /// Open a pool sized independently of download concurrency.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(|e| IngestError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wait for checked-out connections to return, then close them all.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Apply the embedded migrations. Already-applied versions are skipped,
    /// and the scripts themselves only create what does not exist yet.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_bill(&self, bill: &Bill, congress: i32, chamber: Chamber) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO bills
                (congress, chamber, bill_number, title, sponsor, introduced_date, source_file)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT bills_natural_key DO UPDATE SET
                title = EXCLUDED.title,
                sponsor = EXCLUDED.sponsor,
                introduced_date = EXCLUDED.introduced_date,
                source_file = EXCLUDED.source_file,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(congress)
        .bind(chamber.as_str())
        .bind(&bill.bill_number)
        .bind(&bill.title)
        .bind(&bill.sponsor)
        .bind(&bill.introduced_date)
        .bind(&bill.source_file)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn upsert_vote(&self, vote: &Vote, congress: i32, chamber: Chamber) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO votes
                (congress, chamber, vote_id, result, vote_date, source_file)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT votes_natural_key DO UPDATE SET
                result = EXCLUDED.result,
                vote_date = EXCLUDED.vote_date,
                source_file = EXCLUDED.source_file,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(congress)
        .bind(chamber.as_str())
        .bind(&vote.vote_id)
        .bind(&vote.result)
        .bind(&vote.date)
        .bind(&vote.source_file)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn upsert_legislator(&self, legislator: &Legislator) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO legislators (bioguide_id, name, party, state)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT legislators_natural_key DO UPDATE SET
                name = EXCLUDED.name,
                party = EXCLUDED.party,
                state = EXCLUDED.state,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(&legislator.bioguide_id)
        .bind(&legislator.name)
        .bind(&legislator.party)
        .bind(&legislator.state)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Upsert each bill on its own. A bad record is logged and counted; losing
    /// the database altogether aborts the batch with `Unavailable`.
    pub async fn ingest_bills(&self, bills: &[Bill], metrics: &dyn MetricsSink) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for bill in bills {
            let (Some(congress), Some(chamber)) = (bill.congress, bill.chamber) else {
                warn!(bill = bill.bill_number.as_str(), file = bill.source_file.as_str(), "Bill has no congress or chamber, skipping");
                outcome.skipped += 1;
                continue;
            };
            let result = self.upsert_bill(bill, congress, chamber).await;
            settle(&mut outcome, "bills", &bill.bill_number, &bill.source_file, result, metrics)?;
        }
        debug!(table = "bills", upserted = outcome.upserted, failed = outcome.failed, skipped = outcome.skipped, "Batch ingested");
        Ok(outcome)
    }

    pub async fn ingest_votes(&self, votes: &[Vote], metrics: &dyn MetricsSink) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for vote in votes {
            let (Some(congress), Some(chamber)) = (vote.congress, vote.chamber) else {
                warn!(vote = vote.vote_id.as_str(), file = vote.source_file.as_str(), "Vote has no congress or chamber, skipping");
                outcome.skipped += 1;
                continue;
            };
            let result = self.upsert_vote(vote, congress, chamber).await;
            settle(&mut outcome, "votes", &vote.vote_id, &vote.source_file, result, metrics)?;
        }
        debug!(table = "votes", upserted = outcome.upserted, failed = outcome.failed, skipped = outcome.skipped, "Batch ingested");
        Ok(outcome)
    }

    pub async fn ingest_legislators(
        &self,
        legislators: &[Legislator],
        metrics: &dyn MetricsSink,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for legislator in legislators {
            let result = self.upsert_legislator(legislator).await;
            settle(&mut outcome, "legislators", &legislator.bioguide_id, &legislator.name, result, metrics)?;
        }
        debug!(
            table = "legislators",
            upserted = outcome.upserted,
            failed = outcome.failed,
            "Batch ingested"
        );
        Ok(outcome)
    }

    /// Row counts per table.
    pub async fn counts(&self) -> Result<TableCounts> {
        let counts = sqlx::query_as::<_, TableCounts>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM bills) AS bills,
                (SELECT COUNT(*) FROM votes) AS votes,
                (SELECT COUNT(*) FROM legislators) AS legislators
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }
}

fn settle(
    outcome: &mut BatchOutcome,
    table: &str,
    key: &str,
    context: &str,
    result: Result<i64>,
    metrics: &dyn MetricsSink,
) -> Result<()> {
    match result {
        Ok(_) => {
            outcome.upserted += 1;
            metrics.record_upsert(table, true);
            Ok(())
        }
        Err(IngestError::Database(e)) if is_connectivity(&e) => {
            metrics.record_upsert(table, false);
            Err(IngestError::Unavailable(e.to_string()))
        }
        Err(e) => {
            warn!(table, key, context, error = %e, "Upsert failed, continuing");
            outcome.failed += 1;
            metrics.record_upsert(table, false);
            Ok(())
        }
    }
}

/// Errors that mean no further record can be written either.
fn is_connectivity(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_are_distinguished_from_record_errors() {
        assert!(is_connectivity(&sqlx::Error::PoolTimedOut));
        assert!(is_connectivity(&sqlx::Error::PoolClosed));
        assert!(!is_connectivity(&sqlx::Error::RowNotFound));
        assert!(!is_connectivity(&sqlx::Error::ColumnNotFound("title".into())));
    }

    #[test]
    fn record_error_is_counted_not_raised() {
        let mut outcome = BatchOutcome::default();
        let metrics = crate::metrics::NoopMetrics;
        let result = settle(
            &mut outcome,
            "bills",
            "hr1",
            "a.xml",
            Err(IngestError::Database(sqlx::Error::RowNotFound)),
            &metrics,
        );
        assert!(result.is_ok());
        assert_eq!(outcome.failed, 1);
    }

    #[test]
    fn lost_connection_aborts_the_batch() {
        let mut outcome = BatchOutcome::default();
        let metrics = crate::metrics::NoopMetrics;
        let result = settle(
            &mut outcome,
            "bills",
            "hr1",
            "a.xml",
            Err(IngestError::Database(sqlx::Error::PoolClosed)),
            &metrics,
        );
        assert!(matches!(result, Err(IngestError::Unavailable(_))));
    }
}
