//! libSQL backend: async `ProgressStore` implementation.
//!
//! Supports local file and in-memory databases. Every operation holds the
//! connection lock for its whole duration, so a step transaction never
//! picks up (or rolls back) another task's statements.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::identity::{OnboardingIdentity, SessionLookup};
use crate::onboarding::schema::{LedgerInput, PreferencesInput};
use crate::onboarding::state::OnboardingState;
use crate::store::migrations;
use crate::store::traits::{Ledger, Preferences, ProgressStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }

    /// Exclusive access to the connection.
    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

async fn begin(conn: &Connection) -> Result<Transaction, DatabaseError> {
    conn.transaction()
        .await
        .map_err(|e| DatabaseError::Query(format!("begin transaction: {e}")))
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Transaction, result: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("commit: {e}")))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                tracing::error!(error = %e, "Rollback failed");
            }
            Err(err)
        }
    }
}

fn insert_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") || message.contains("CHECK constraint failed") {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

async fn count_rows(conn: &Connection, sql: &str, subject_id: &str) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query(sql, params![subject_id])
        .await
        .map_err(|e| DatabaseError::Query(format!("count_rows: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Query(format!("count_rows: {e}"))),
    }
}

/// Stored state, or the state implied by which records exist.
async fn load_state(conn: &Connection, subject_id: &str) -> Result<OnboardingState, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT state FROM onboarding_progress WHERE subject_id = ?1",
            params![subject_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("load_state: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => {
            let raw: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("load_state row parse: {e}")))?;
            raw.parse().map_err(DatabaseError::Query)
        }
        Ok(None) => {
            let preferences = count_rows(
                conn,
                "SELECT COUNT(*) FROM user_preferences WHERE subject_id = ?1",
                subject_id,
            )
            .await?;
            let ledgers = count_rows(
                conn,
                "SELECT COUNT(*) FROM ledgers WHERE owner_id = ?1",
                subject_id,
            )
            .await?;
            Ok(OnboardingState::from_records(preferences > 0, ledgers > 0))
        }
        Err(e) => Err(DatabaseError::Query(format!("load_state: {e}"))),
    }
}

/// Fail with `StaleState` unless the subject is in `expected`.
async fn expect_state(
    conn: &Connection,
    subject_id: &str,
    expected: OnboardingState,
) -> Result<(), DatabaseError> {
    let current = load_state(conn, subject_id).await?;
    if current == expected {
        Ok(())
    } else {
        Err(DatabaseError::StaleState { current })
    }
}

async fn store_state(
    conn: &Connection,
    subject_id: &str,
    from: OnboardingState,
    state: OnboardingState,
) -> Result<(), DatabaseError> {
    if !from.can_transition_to(state) {
        return Err(DatabaseError::Constraint(format!(
            "illegal onboarding transition {from} -> {state}"
        )));
    }
    conn.execute(
        "INSERT INTO onboarding_progress (subject_id, state, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (subject_id) DO UPDATE SET state = ?2, updated_at = ?3",
        params![subject_id, state.as_str(), Utc::now().to_rfc3339()],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("store_state: {e}")))?;
    Ok(())
}

fn row_to_preferences(row: &libsql::Row) -> Result<Preferences, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("preferences row parse: {e}"));
    let subject_id: String = row.get(0).map_err(parse)?;
    let language: String = row.get(1).map_err(parse)?;
    let currency: String = row.get(2).map_err(parse)?;
    let created_at: String = row.get(3).map_err(parse)?;

    Ok(Preferences {
        subject_id,
        language: language
            .parse()
            .map_err(|_| DatabaseError::Query(format!("unknown language '{language}'")))?,
        currency: currency
            .parse()
            .map_err(|_| DatabaseError::Query(format!("unknown currency '{currency}'")))?,
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_ledger(row: &libsql::Row) -> Result<Ledger, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("ledger row parse: {e}"));
    let id: String = row.get(0).map_err(parse)?;
    let owner_id: String = row.get(1).map_err(parse)?;
    let name: String = row.get(2).map_err(parse)?;
    let created_at: String = row.get(3).map_err(parse)?;

    Ok(Ledger {
        id: Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Query(format!("ledger id '{id}': {e}")))?,
        owner_id,
        name,
        created_at: parse_datetime(&created_at),
    })
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl ProgressStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&*self.conn().await).await
    }

    // ── Progress ────────────────────────────────────────────────────

    async fn get_state(&self, subject_id: &str) -> Result<OnboardingState, DatabaseError> {
        load_state(&*self.conn().await, subject_id).await
    }

    async fn create_preferences(
        &self,
        subject_id: &str,
        input: &PreferencesInput,
    ) -> Result<Preferences, DatabaseError> {
        let conn = self.conn().await;
        let tx = begin(&conn).await?;

        let result = async {
            expect_state(&tx, subject_id, OnboardingState::AwaitingPreferences).await?;

            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO user_preferences (subject_id, language, currency, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    subject_id,
                    input.language.as_str(),
                    input.currency.as_str(),
                    created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| insert_error("create_preferences", e))?;

            store_state(
                &tx,
                subject_id,
                OnboardingState::AwaitingPreferences,
                OnboardingState::AwaitingLedger,
            ).await?;

            Ok(Preferences {
                subject_id: subject_id.to_string(),
                language: input.language,
                currency: input.currency,
                created_at,
            })
        }
        .await;

        let preferences = finish(tx, result).await?;
        debug!(subject_id, "Preferences stored");
        Ok(preferences)
    }

    async fn create_ledger(
        &self,
        owner_id: &str,
        input: &LedgerInput,
    ) -> Result<Ledger, DatabaseError> {
        let conn = self.conn().await;
        let tx = begin(&conn).await?;

        let result = async {
            expect_state(&tx, owner_id, OnboardingState::AwaitingLedger).await?;

            let ledger = Ledger {
                id: Uuid::new_v4(),
                owner_id: owner_id.to_string(),
                name: input.name.clone(),
                created_at: Utc::now(),
            };
            tx.execute(
                "INSERT INTO ledgers (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    ledger.id.to_string(),
                    ledger.owner_id.as_str(),
                    ledger.name.as_str(),
                    ledger.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| insert_error("create_ledger", e))?;

            store_state(
                &tx,
                owner_id,
                OnboardingState::AwaitingLedger,
                OnboardingState::Complete,
            ).await?;
            Ok(ledger)
        }
        .await;

        let ledger = finish(tx, result).await?;
        debug!(owner_id, ledger_id = %ledger.id, "Ledger stored");
        Ok(ledger)
    }

    // ── Records ─────────────────────────────────────────────────────

    async fn get_preferences(&self, subject_id: &str) -> Result<Option<Preferences>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT subject_id, language, currency, created_at
                 FROM user_preferences WHERE subject_id = ?1",
                params![subject_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_preferences: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_preferences(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_preferences: {e}"))),
        }
    }

    async fn list_ledgers(&self, owner_id: &str) -> Result<Vec<Ledger>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT id, owner_id, name, created_at FROM ledgers
                 WHERE owner_id = ?1 ORDER BY created_at ASC",
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_ledgers: {e}")))?;

        let mut ledgers = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_ledgers: {e}")))?
        {
            ledgers.push(row_to_ledger(&row)?);
        }
        Ok(ledgers)
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn create_session(
        &self,
        session_id: &str,
        identity: &OnboardingIdentity,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO sessions (id, subject_id, email, has_account, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                identity.subject_id.as_str(),
                identity.email.as_str(),
                identity.has_account as i64,
                expires_at.to_rfc3339()
            ],
        )
        .await
        .map_err(|e| insert_error("create_session", e))?;
        Ok(())
    }
}

#[async_trait]
impl SessionLookup for LibSqlBackend {
    async fn lookup_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OnboardingIdentity>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT subject_id, email, has_account, expires_at FROM sessions WHERE id = ?1",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("lookup_session: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("lookup_session: {e}"))),
        };

        let parse = |e: libsql::Error| DatabaseError::Query(format!("session row parse: {e}"));
        let expires_at: String = row.get(3).map_err(parse)?;
        if parse_datetime(&expires_at) <= Utc::now() {
            debug!("Session expired");
            return Ok(None);
        }

        Ok(Some(OnboardingIdentity {
            subject_id: row.get(0).map_err(parse)?,
            email: row.get(1).map_err(parse)?,
            has_account: row.get::<i64>(2).map_err(parse)? != 0,
        }))
    }
}
