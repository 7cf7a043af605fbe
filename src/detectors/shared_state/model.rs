//! Shared-state model for one unit
//!
//! Groups attribute accesses reported by the walker into one entry per
//! `Class.attribute`, and classifies each access once the whole unit has
//! been seen (confinement depends on unit-wide concurrency markers).

use super::protection::ProtectionKind;
use crate::detectors::walker::{AttrAccess, HeldLocks, Routine, RoutineKind, WalkEvents};
use crate::models::{AccessKind, AccessPoint, AccessType, SharedState};
use rustc_hash::FxHashMap;
use std::path::Path;

#[derive(Debug, Clone)]
struct RecordedAccess {
    routine: Routine,
    lock: Option<String>,
    access: AttrAccess,
}

#[derive(Debug, Default)]
struct StateEntry {
    accesses: Vec<RecordedAccess>,
}

impl StateEntry {
    /// Declaration line: class body, then constructor, then first access
    fn declaration_line(&self) -> u32 {
        let rank = |r: &RecordedAccess| match r.routine.kind {
            RoutineKind::ClassBody => 0,
            RoutineKind::Method if r.routine.short_name == "__init__" => 1,
            _ => 2,
        };
        self.accesses
            .iter()
            .filter(|r| r.access.kind == AccessKind::Write)
            .min_by_key(|r| (rank(r), r.access.line))
            .or_else(|| self.accesses.iter().min_by_key(|r| r.access.line))
            .map(|r| r.access.line)
            .unwrap_or(1)
    }
}

/// A shared state with the protection of each of its access points
#[derive(Debug, Clone)]
pub struct TrackedState {
    pub state: SharedState,
    /// Parallel to `state.access_points`
    pub protections: Vec<Option<ProtectionKind>>,
}

impl TrackedState {
    pub fn writes(&self) -> impl Iterator<Item = (&AccessPoint, Option<&ProtectionKind>)> {
        self.state
            .access_points
            .iter()
            .zip(self.protections.iter())
            .filter(|(ap, _)| ap.kind == AccessKind::Write)
            .map(|(ap, p)| (ap, p.as_ref()))
    }
}

/// Collects accesses for one unit; implements [`WalkEvents`]
#[derive(Debug, Default)]
pub struct SharedStateModel {
    entries: FxHashMap<String, StateEntry>,
    /// First-seen order of qualified names
    order: Vec<String>,
    saw_lock: bool,
}

impl WalkEvents for SharedStateModel {
    fn acquire(&mut self, _routine: &Routine, _held: &HeldLocks, _lock: &str, _line: u32) {
        self.saw_lock = true;
    }

    fn access(&mut self, routine: &Routine, held: &HeldLocks, access: AttrAccess) {
        let Some(class) = routine.class.as_deref() else {
            return;
        };
        let key = format!("{}.{}", class, access.attr);
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.entry(key).or_default().accesses.push(RecordedAccess {
            routine: routine.clone(),
            lock: held.innermost().map(String::from),
            access,
        });
    }
}

impl SharedStateModel {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any lock was acquired anywhere in the unit
    pub fn saw_lock(&self) -> bool {
        self.saw_lock
    }

    /// Freeze the model into immutable states
    pub fn finish(self, file_path: &Path, concurrent_unit: bool) -> Vec<TrackedState> {
        let mut entries = self.entries;
        let mut states = Vec::with_capacity(self.order.len());
        for name in self.order {
            let Some(entry) = entries.remove(&name) else {
                continue;
            };
            let line_number = entry.declaration_line();
            let mut access_points = Vec::with_capacity(entry.accesses.len());
            let mut protections = Vec::with_capacity(entry.accesses.len());
            let (mut reads, mut writes) = (false, false);

            for recorded in &entry.accesses {
                let protection = ProtectionKind::classify(
                    &recorded.routine,
                    recorded.lock.as_deref(),
                    &recorded.access,
                    concurrent_unit,
                );
                match recorded.access.kind {
                    AccessKind::Read => reads = true,
                    AccessKind::Write => {
                        writes = true;
                        reads |= recorded.access.read_modify_write;
                    }
                }
                access_points.push(AccessPoint {
                    kind: recorded.access.kind,
                    file_path: file_path.to_path_buf(),
                    line_number: recorded.access.line,
                    lock_held: recorded.lock.is_some(),
                    routine: recorded.routine.name.clone(),
                    read_modify_write: recorded.access.read_modify_write,
                    receiver: Some(recorded.access.receiver.clone()),
                    protection: protection.as_ref().map(ProtectionKind::label),
                });
                protections.push(protection);
            }

            let access_type = match (reads, writes) {
                (true, true) => AccessType::Both,
                (false, true) => AccessType::Write,
                _ => AccessType::Read,
            };
            let write_protections = access_points
                .iter()
                .zip(&protections)
                .filter(|(ap, _)| ap.kind == AccessKind::Write)
                .map(|(_, p)| p);
            let mut protected = true;
            let mut lock_name = None;
            for protection in write_protections {
                match protection {
                    None => protected = false,
                    Some(ProtectionKind::LockHeld { lock }) if lock_name.is_none() => {
                        lock_name = Some(lock.clone())
                    }
                    Some(_) => {}
                }
            }

            states.push(TrackedState {
                state: SharedState {
                    name,
                    file_path: file_path.to_path_buf(),
                    line_number,
                    access_type,
                    protected,
                    lock_name,
                    access_points,
                },
                protections,
            });
        }
        states
    }
}
