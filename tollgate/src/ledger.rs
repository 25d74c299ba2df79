//! Durable record of consumed and reserved payment authorizations.
//!
//! The nonce ledger is the system's single serialization point: settlement
//! reserves a `(payer, nonce)` pair with an atomic conditional write, and
//! that reservation is what guarantees at-most-once settlement under
//! arbitrary concurrent callers — including callers in other processes,
//! when backed by [`SqliteNonceLedger`].
//!
//! State machine per `(payer, nonce)` key:
//!
//! ```text
//! Free --reserve--> Reserved --commit--------> Consumed   (permanent)
//!                   Reserved --mark_pending--> Pending    (indeterminate)
//!                   Reserved --release-------> Free
//! ```
//!
//! `release` only ever removes a `Reserved` record; `Consumed` and
//! `Pending` records are never silently forgotten.

use dashmap::DashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

/// State of a `(payer, nonce)` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceState {
    /// Reserved by an in-flight settlement.
    Reserved,
    /// Settled; the authorization is spent forever.
    Consumed,
    /// A transfer was broadcast but its outcome is unknown. Blocks both
    /// verification and settlement until reconciled out of band.
    Pending,
}

impl NonceState {
    const fn to_db(self) -> i64 {
        match self {
            Self::Reserved => 1,
            Self::Consumed => 2,
            Self::Pending => 3,
        }
    }

    const fn from_db(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Reserved),
            2 => Some(Self::Consumed),
            3 => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Errors from a nonce ledger backend.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The underlying store failed.
    #[error("nonce store failure: {0}")]
    Store(String),

    /// A state transition was applied to a record not in its expected
    /// state, e.g. committing a nonce that was never reserved.
    #[error("invalid nonce transition for ({payer}, {nonce})")]
    InvalidTransition {
        /// The payer component of the key.
        payer: String,
        /// The nonce component of the key.
        nonce: String,
    },
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Atomically-updated record of consumed and reserved authorizations.
///
/// Callers pass canonicalized keys (see
/// [`canonical_identity`](crate::proto::canonical_identity)); the ledger
/// treats them as opaque.
pub trait NonceLedger: Send + Sync {
    /// Atomically transitions `(payer, nonce)` from Free to Reserved.
    ///
    /// Returns `false` when any record already exists for the key, in
    /// whatever state. This is the sole mutual-exclusion point of the
    /// whole engine.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] on backend failure.
    fn reserve(&self, payer: &str, nonce: &str) -> Result<bool, LedgerError>;

    /// Returns whether the key is spent — `Consumed`, or `Pending` with an
    /// indeterminate broadcast, which is never treated as fresh.
    ///
    /// Read-only; safe to call from verification any number of times.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] on backend failure.
    fn is_consumed(&self, payer: &str, nonce: &str) -> Result<bool, LedgerError>;

    /// Returns the key back to Free. Only removes a `Reserved` record;
    /// `Consumed` and `Pending` records are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] on backend failure.
    fn release(&self, payer: &str, nonce: &str) -> Result<(), LedgerError>;

    /// Transitions Reserved → Consumed, recording the settlement
    /// reference. Permanent.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidTransition`] if the key is not `Reserved`.
    fn commit(&self, payer: &str, nonce: &str, tx_ref: &str) -> Result<(), LedgerError>;

    /// Transitions Reserved → Pending, recording the provisional
    /// transaction reference for out-of-band reconciliation.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidTransition`] if the key is not `Reserved`.
    fn mark_pending(&self, payer: &str, nonce: &str, tx_ref: &str) -> Result<(), LedgerError>;

    /// Removes `Consumed` records older than `max_age_secs`. Records must
    /// persist at least through their authorization's deadline window, so
    /// callers pass a retention comfortably beyond it. Returns the number
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] on backend failure.
    fn purge(&self, max_age_secs: u64) -> Result<usize, LedgerError>;
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct MemoryRecord {
    state: NonceState,
    recorded_at: i64,
}

/// In-process nonce ledger backed by a concurrent map.
///
/// Atomic within a single process only — suitable for tests and
/// single-instance development, not for production replay safety across
/// restarts or replicas. Use [`SqliteNonceLedger`] for that.
#[derive(Debug, Default)]
pub struct MemoryNonceLedger {
    records: DashMap<(String, String), MemoryRecord>,
}

impl MemoryNonceLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held. Test instrumentation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the ledger holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the state of a key, if any record exists.
    #[must_use]
    pub fn state(&self, payer: &str, nonce: &str) -> Option<NonceState> {
        self.records
            .get(&(payer.to_owned(), nonce.to_owned()))
            .map(|r| r.state)
    }
}

impl NonceLedger for MemoryNonceLedger {
    fn reserve(&self, payer: &str, nonce: &str) -> Result<bool, LedgerError> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry((payer.to_owned(), nonce.to_owned())) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(MemoryRecord {
                    state: NonceState::Reserved,
                    recorded_at: unix_now(),
                });
                Ok(true)
            }
        }
    }

    fn is_consumed(&self, payer: &str, nonce: &str) -> Result<bool, LedgerError> {
        Ok(matches!(
            self.state(payer, nonce),
            Some(NonceState::Consumed | NonceState::Pending)
        ))
    }

    fn release(&self, payer: &str, nonce: &str) -> Result<(), LedgerError> {
        self.records
            .remove_if(&(payer.to_owned(), nonce.to_owned()), |_, r| {
                r.state == NonceState::Reserved
            });
        Ok(())
    }

    fn commit(&self, payer: &str, nonce: &str, _tx_ref: &str) -> Result<(), LedgerError> {
        let key = (payer.to_owned(), nonce.to_owned());
        match self.records.get_mut(&key) {
            Some(mut record) if record.state == NonceState::Reserved => {
                record.state = NonceState::Consumed;
                Ok(())
            }
            _ => Err(LedgerError::InvalidTransition {
                payer: payer.to_owned(),
                nonce: nonce.to_owned(),
            }),
        }
    }

    fn mark_pending(&self, payer: &str, nonce: &str, _tx_ref: &str) -> Result<(), LedgerError> {
        let key = (payer.to_owned(), nonce.to_owned());
        match self.records.get_mut(&key) {
            Some(mut record) if record.state == NonceState::Reserved => {
                record.state = NonceState::Pending;
                Ok(())
            }
            _ => Err(LedgerError::InvalidTransition {
                payer: payer.to_owned(),
                nonce: nonce.to_owned(),
            }),
        }
    }

    fn purge(&self, max_age_secs: u64) -> Result<usize, LedgerError> {
        let cutoff = unix_now().saturating_sub(i64::try_from(max_age_secs).unwrap_or(i64::MAX));
        let before = self.records.len();
        self.records
            .retain(|_, r| r.state != NonceState::Consumed || r.recorded_at >= cutoff);
        Ok(before - self.records.len())
    }
}

/// Durable nonce ledger backed by SQLite.
///
/// The `PRIMARY KEY (payer, nonce)` insert is the atomic conditional
/// write: the database, not the process, decides which of any number of
/// concurrent reservations wins, so replay safety holds across restarts
/// and across facilitator instances sharing the file.
pub struct SqliteNonceLedger {
    conn: Mutex<rusqlite::Connection>,
}

impl std::fmt::Debug for SqliteNonceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteNonceLedger").finish_non_exhaustive()
    }
}

impl SqliteNonceLedger {
    /// Opens (or creates) the nonce database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the database cannot be opened or
    /// the schema cannot be applied.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nonce_records (
                payer TEXT NOT NULL,
                nonce TEXT NOT NULL,
                state INTEGER NOT NULL,
                tx_ref TEXT,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (payer, nonce)
            );
            CREATE INDEX IF NOT EXISTS idx_nonce_recorded_at
                ON nonce_records(recorded_at);
            PRAGMA journal_mode=WAL;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("nonce ledger mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Returns the state of a key, if any record exists.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] on query failure.
    pub fn state(&self, payer: &str, nonce: &str) -> Result<Option<NonceState>, LedgerError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT state FROM nonce_records WHERE payer = ?1 AND nonce = ?2")?;
        let mut rows = stmt.query(rusqlite::params![payer, nonce])?;
        match rows.next()? {
            Some(row) => {
                let raw: i64 = row.get(0)?;
                Ok(NonceState::from_db(raw))
            }
            None => Ok(None),
        }
    }
}

impl NonceLedger for SqliteNonceLedger {
    fn reserve(&self, payer: &str, nonce: &str) -> Result<bool, LedgerError> {
        let conn = self.lock();
        let result = conn.execute(
            "INSERT INTO nonce_records (payer, nonce, state, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![payer, nonce, NonceState::Reserved.to_db(), unix_now()],
        );
        match result {
            Ok(_) => Ok(true),
            // Primary-key violation: some record already exists. Losing the
            // race is the expected outcome here, not a fault.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_consumed(&self, payer: &str, nonce: &str) -> Result<bool, LedgerError> {
        Ok(matches!(
            self.state(payer, nonce)?,
            Some(NonceState::Consumed | NonceState::Pending)
        ))
    }

    fn release(&self, payer: &str, nonce: &str) -> Result<(), LedgerError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM nonce_records
             WHERE payer = ?1 AND nonce = ?2 AND state = ?3",
            rusqlite::params![payer, nonce, NonceState::Reserved.to_db()],
        )?;
        Ok(())
    }

    fn commit(&self, payer: &str, nonce: &str, tx_ref: &str) -> Result<(), LedgerError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE nonce_records SET state = ?4, tx_ref = ?5
             WHERE payer = ?1 AND nonce = ?2 AND state = ?3",
            rusqlite::params![
                payer,
                nonce,
                NonceState::Reserved.to_db(),
                NonceState::Consumed.to_db(),
                tx_ref
            ],
        )?;
        if changed == 1 {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition {
                payer: payer.to_owned(),
                nonce: nonce.to_owned(),
            })
        }
    }

    fn mark_pending(&self, payer: &str, nonce: &str, tx_ref: &str) -> Result<(), LedgerError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE nonce_records SET state = ?4, tx_ref = ?5
             WHERE payer = ?1 AND nonce = ?2 AND state = ?3",
            rusqlite::params![
                payer,
                nonce,
                NonceState::Reserved.to_db(),
                NonceState::Pending.to_db(),
                tx_ref
            ],
        )?;
        if changed == 1 {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition {
                payer: payer.to_owned(),
                nonce: nonce.to_owned(),
            })
        }
    }

    fn purge(&self, max_age_secs: u64) -> Result<usize, LedgerError> {
        let cutoff = unix_now().saturating_sub(i64::try_from(max_age_secs).unwrap_or(i64::MAX));
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM nonce_records WHERE state = ?1 AND recorded_at < ?2",
            rusqlite::params![NonceState::Consumed.to_db(), cutoff],
        )?;
        Ok(removed)
    }
}
