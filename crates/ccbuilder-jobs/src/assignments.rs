//! Worker slot assignments.
//!
//! Slot `i` holds the id of the job worker `i` is executing, if any. The
//! reaper reads the table to decide whether a `RUNNING` job still has an
//! owner.

use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use ccbuilder_core::{Error, Result};

/// Fixed-size table mapping worker slots to job ids.
#[derive(Debug)]
pub struct AssignmentTable {
    slots: Mutex<Vec<Option<Uuid>>>,
}

impl AssignmentTable {
    pub fn new(size: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; size]),
        }
    }

    // A panicking worker must not make the table unusable for the reaper.
    fn slots(&self) -> MutexGuard<'_, Vec<Option<Uuid>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Record `job_id` in `slot`.
    ///
    /// Fails if the slot is out of range or busy, or if another slot already
    /// holds the job. The slot is cleared when the returned guard drops,
    /// including during a panic unwind.
    pub fn assign(&self, slot: usize, job_id: Uuid) -> Result<Assignment<'_>> {
        let mut slots = self.slots();
        let size = slots.len();

        if slot >= size {
            return Err(Error::Job(format!(
                "slot {} out of range for {} workers",
                slot, size
            )));
        }
        if let Some(other) = slots.iter().position(|s| *s == Some(job_id)) {
            return Err(Error::Job(format!(
                "job {} is already assigned to slot {}",
                job_id, other
            )));
        }
        if let Some(current) = slots[slot] {
            return Err(Error::Job(format!(
                "slot {} is busy with job {}",
                slot, current
            )));
        }

        slots[slot] = Some(job_id);
        Ok(Assignment {
            table: self,
            slot,
            job_id,
        })
    }

    /// The job held by `slot`.
    pub fn current(&self, slot: usize) -> Option<Uuid> {
        self.slots().get(slot).copied().flatten()
    }

    /// Number of slots holding `job_id`.
    pub fn holders(&self, job_id: Uuid) -> usize {
        self.slots().iter().filter(|s| **s == Some(job_id)).count()
    }

    pub fn snapshot(&self) -> Vec<Option<Uuid>> {
        self.slots().clone()
    }

    fn release(&self, slot: usize, job_id: Uuid) {
        let mut slots = self.slots();
        if let Some(entry) = slots.get_mut(slot) {
            if *entry == Some(job_id) {
                *entry = None;
            }
        }
    }
}

/// Guard for an occupied slot.
#[derive(Debug)]
pub struct Assignment<'a> {
    table: &'a AssignmentTable,
    slot: usize,
    job_id: Uuid,
}

impl Assignment<'_> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

impl Drop for Assignment<'_> {
    fn drop(&mut self) {
        self.table.release(self.slot, self.job_id);
    }
}
