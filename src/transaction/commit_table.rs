use std::collections::{BTreeMap, BTreeSet};

use crate::types::{CommitId, Result, StratumError, TRANSACTION_ID_START};

/// Token returned when a transaction pins its snapshot in the [`CommitTable`].
#[derive(Debug, PartialEq, Eq)]
pub struct CommitReader {
    snapshot: CommitId,
}

impl CommitReader {
    /// Commit id this reader pins.
    pub fn snapshot(&self) -> CommitId {
        self.snapshot
    }
}

/// Reserved commit ids plus the snapshots still pinned by readers.
///
/// The transaction manager reserves an id before the commit pass, marks it
/// committed afterwards and abandons it when the pass fails. Ids are handed
/// out in increasing order; an abandoned id may be reserved again.
#[derive(Clone, Debug, Default)]
pub struct CommitTable {
    last_committed: CommitId,
    reserved: BTreeSet<CommitId>,
    pins: BTreeMap<CommitId, u32>,
}

impl CommitTable {
    /// Creates a table whose newest commit is `last_committed`.
    pub fn new(last_committed: CommitId) -> Self {
        Self {
            last_committed,
            ..Self::default()
        }
    }

    /// Reserves `id` for a commit pass.
    pub fn reserve(&mut self, id: CommitId) -> Result<()> {
        if id >= TRANSACTION_ID_START {
            return Err(StratumError::Invalid("commit id space exhausted"));
        }
        if id <= self.last_committed {
            return Err(StratumError::Invalid("commit id already used"));
        }
        if self.reserved.last().map_or(false, |&last| id <= last) {
            return Err(StratumError::Invalid("commit id must increase"));
        }
        self.reserved.insert(id);
        Ok(())
    }

    /// Marks a reserved id committed.
    pub fn mark_committed(&mut self, id: CommitId) -> Result<()> {
        if !self.reserved.remove(&id) {
            return Err(StratumError::Invalid("commit id not reserved"));
        }
        self.last_committed = self.last_committed.max(id);
        Ok(())
    }

    /// Forgets a reservation whose commit pass failed.
    pub fn abandon(&mut self, id: CommitId) -> Result<()> {
        if !self.reserved.remove(&id) {
            return Err(StratumError::Invalid("commit id not reserved"));
        }
        Ok(())
    }

    /// Newest committed id.
    pub fn last_committed(&self) -> CommitId {
        self.last_committed
    }

    /// Pins `snapshot` until the returned token is released.
    pub fn register_reader(&mut self, snapshot: CommitId) -> Result<CommitReader> {
        if snapshot > self.last_committed {
            return Err(StratumError::Invalid("reader snapshot not committed"));
        }
        let pins = self.pins.entry(snapshot).or_insert(0);
        *pins = pins
            .checked_add(1)
            .ok_or(StratumError::Invalid("reader pin overflow"))?;
        Ok(CommitReader { snapshot })
    }

    /// Unpins the snapshot of `reader`.
    pub fn release_reader(&mut self, reader: CommitReader) {
        if let Some(pins) = self.pins.get_mut(&reader.snapshot) {
            *pins -= 1;
            if *pins == 0 {
                self.pins.remove(&reader.snapshot);
            }
        }
    }

    /// Smallest commit id some reader may still observe.
    ///
    /// Update history committed at or below this id is visible to every
    /// snapshot and can be collapsed.
    pub fn oldest_visible(&self) -> CommitId {
        self.pins
            .keys()
            .next()
            .copied()
            .unwrap_or(self.last_committed)
    }

    /// Number of registered readers.
    pub fn active_readers(&self) -> usize {
        self.pins.values().map(|&pins| pins as usize).sum()
    }
}
