//! Gapless per-series document numbering.
//!
//! SIFEN timbrado rules require gapless, strictly increasing numbers per
//! (environment, RUC, establishment, expedition point, document type) series.
//! Persistence lives behind the narrow [`SequenceStore`] collaborator: one
//! exclusive read-modify-write per call, rolled back entirely on error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::EkuatiaError;
use super::series::DocumentKey;

/// One counter row. Rows are created on first use and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    /// Series this row belongs to.
    pub key: DocumentKey,
    /// Last number handed out for the series.
    pub last_assigned: u64,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

/// Transactional persistence collaborator for [`SequenceState`].
///
/// `with_key_locked` must run the closure under an exclusive lock scoped to
/// `key` (writers on the same key block each other; other keys proceed), and
/// must persist the returned state only when the closure succeeds. On error
/// nothing is written; callers never observe a torn update.
pub trait SequenceStore: Send + Sync {
    /// Run `f` with the current row (if any) under the key's write lock,
    /// committing the returned state.
    fn with_key_locked(
        &self,
        key: &DocumentKey,
        f: &mut dyn FnMut(Option<&SequenceState>) -> Result<SequenceState, EkuatiaError>,
    ) -> Result<SequenceState, EkuatiaError>;
}

/// Assign the next document number for a series.
///
/// With no prior row, returns `requested` when `requested > 0`, else `1`.
/// With a row at `L`, returns `requested` when `requested > L`, else `L + 1`.
/// A zero or backward `requested` falls back to the default assignment, it is
/// never a fault. Under correct store locking, concurrent callers on the same
/// key receive distinct, strictly increasing values.
///
/// # Errors
///
/// [`EkuatiaError::Store`] when the persistence collaborator fails (the
/// transaction is rolled back, no number is consumed).
pub fn next_number(
    store: &dyn SequenceStore,
    key: &DocumentKey,
    requested: Option<u64>,
) -> Result<u64, EkuatiaError> {
    let state = store.with_key_locked(key, &mut |existing| {
        let next = match existing {
            None => match requested {
                Some(r) if r > 0 => r,
                _ => 1,
            },
            Some(row) => match requested {
                Some(r) if r > row.last_assigned => r,
                _ => row.last_assigned + 1,
            },
        };
        Ok(SequenceState {
            key: key.clone(),
            last_assigned: next,
            updated_at: Utc::now(),
        })
    })?;

    Ok(state.last_assigned)
}

/// In-memory [`SequenceStore`] with per-key locking.
///
/// Reference implementation and test double; production deployments supply a
/// database-backed store with equivalent transaction semantics.
#[derive(Debug, Default)]
pub struct MemorySequenceStore {
    rows: Mutex<HashMap<DocumentKey, Arc<Mutex<Option<SequenceState>>>>>,
}

impl MemorySequenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, key: &DocumentKey) -> Result<Arc<Mutex<Option<SequenceState>>>, EkuatiaError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| EkuatiaError::Store("sequence map poisoned".into()))?;
        Ok(rows.entry(key.clone()).or_default().clone())
    }

    /// Current state for a key, if a row exists.
    pub fn get(&self, key: &DocumentKey) -> Option<SequenceState> {
        let row = self.row(key).ok()?;
        let guard = row.lock().ok()?;
        guard.clone()
    }
}

impl SequenceStore for MemorySequenceStore {
    fn with_key_locked(
        &self,
        key: &DocumentKey,
        f: &mut dyn FnMut(Option<&SequenceState>) -> Result<SequenceState, EkuatiaError>,
    ) -> Result<SequenceState, EkuatiaError> {
        let row = self.row(key)?;
        let mut guard = row
            .lock()
            .map_err(|_| EkuatiaError::Store("sequence row poisoned".into()))?;
        // Commit only on success; an Err leaves the row untouched.
        let state = f(guard.as_ref())?;
        *guard = Some(state.clone());
        Ok(state)
    }
}
