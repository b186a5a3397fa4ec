//! `Tracer`: the file-backed `TraceSink`.
//!
//! Each run gets an in-memory buffer and a write-through JSONL log at
//! `<runs_dir>/<run_id>/trace.jsonl`. A line is appended and written before
//! the entry joins the buffer, so a crash after `record()` returns never
//! loses it. Buffer eviction (`flush`) and log deletion (`clear_run`) are
//! independent.
//!
//! The run table lock is held only to look up a run's slot. Each run's chain
//! has its own lock, held across that run's disk append, so concurrent runs
//! never wait on each other's I/O.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Write},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, warn};

use quire_contracts::{
    config::TraceSettings,
    error::{QuireError, QuireResult},
    run::RunId,
    trace::{TraceEntry, TraceRecord},
};
use quire_core::traits::TraceSink;

use crate::{
    chain::{hash_entry, verify_chain},
    event::TraceEvent,
    scrub::PiiScrubber,
};

/// File name of every run's persisted log.
pub const TRACE_FILE: &str = "trace.jsonl";

/// Buffered entries and chain head for one run.
#[derive(Debug, Default)]
struct RunChain {
    entries: Vec<TraceEntry>,
    next_sequence: u64,
    last_hash: String,
}

impl RunChain {
    fn from_events(events: Vec<TraceEvent>) -> Self {
        let next_sequence = events.len() as u64;
        let last_hash = events
            .last()
            .map(|e| e.this_hash.clone())
            .unwrap_or_else(|| TraceEvent::GENESIS_HASH.to_string());
        Self {
            entries: events.into_iter().map(|e| e.entry).collect(),
            next_sequence,
            last_hash,
        }
    }
}

/// One run's chain. `None` until the first write seeds it, and again after
/// `flush` evicts it; the slot itself is never removed, so writes to one run
/// stay serialized across evictions.
type RunSlot = Arc<Mutex<Option<RunChain>>>;

pub struct Tracer {
    settings: TraceSettings,
    scrubber: PiiScrubber,
    runs: Mutex<HashMap<RunId, RunSlot>>,
}

impl Tracer {
    /// Build a tracer from settings. Fails on an invalid PII pattern.
    pub fn new(settings: TraceSettings) -> QuireResult<Self> {
        let scrubber = PiiScrubber::from_settings(&settings)?;
        Ok(Self {
            settings,
            scrubber,
            runs: Mutex::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &TraceSettings {
        &self.settings
    }

    /// Path of the persisted log for `run_id`.
    pub fn log_path(&self, run_id: &RunId) -> PathBuf {
        self.settings.runs_dir.join(run_id.as_str()).join(TRACE_FILE)
    }

    /// Sanitize a raw record into the entry that will be stored.
    pub fn sanitize(&self, record: TraceRecord) -> TraceEntry {
        let mut entry = record.into_entry();
        entry.input = self.scrubber.scrub_value(&entry.input);
        entry.output = self.scrubber.scrub_value(&entry.output);
        entry.error = entry.error.map(|e| self.scrubber.scrub_text(&e));
        entry
    }

    /// All entries for a run: the in-memory buffer if present, otherwise a
    /// replay of the persisted log.
    pub fn get_trace(&self, run_id: &RunId) -> QuireResult<Vec<TraceEntry>> {
        let slot = self.lock().get(run_id).cloned();
        if let Some(slot) = slot {
            if let Some(chain) = lock_slot(&slot).as_ref() {
                return Ok(chain.entries.clone());
            }
        }
        self.replay(run_id)
    }

    /// Reconstruct a run's entries from its persisted log alone.
    ///
    /// A run with no log yields an empty list.
    pub fn replay(&self, run_id: &RunId) -> QuireResult<Vec<TraceEntry>> {
        Ok(self
            .read_events(run_id)?
            .into_iter()
            .map(|e| e.entry)
            .collect())
    }

    /// Read every persisted event for a run, in file order.
    pub fn read_events(&self, run_id: &RunId) -> QuireResult<Vec<TraceEvent>> {
        check_run_id(run_id)?;
        let path = self.log_path(run_id);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(QuireError::TraceReadFailed {
                    reason: format!("failed to open '{}': {}", path.display(), e),
                })
            }
        };

        let mut events = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| QuireError::TraceReadFailed {
                reason: format!("failed to read '{}': {}", path.display(), e),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: TraceEvent =
                serde_json::from_str(&line).map_err(|e| QuireError::TraceReadFailed {
                    reason: format!("{} line {}: {}", path.display(), idx + 1, e),
                })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Check the persisted log's hash chain.
    ///
    /// `Ok(false)` when any line was altered, removed, or reordered, or when
    /// a line belongs to another run.
    pub fn verify_integrity(&self, run_id: &RunId) -> QuireResult<bool> {
        let events = match self.read_events(run_id) {
            Ok(events) => events,
            Err(QuireError::TraceReadFailed { reason }) => {
                warn!(run_id = %run_id, %reason, "trace log unreadable during verification");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if events.iter().any(|e| &e.entry.run_id != run_id) {
            return Ok(false);
        }
        Ok(verify_chain(&events))
    }

    /// Evict buffered entries: one run's, or every run's when `run_id` is
    /// `None`. Persisted logs are untouched.
    pub fn flush(&self, run_id: Option<&RunId>) {
        let slots: Vec<RunSlot> = {
            let runs = self.lock();
            match run_id {
                Some(id) => runs.get(id).cloned().into_iter().collect(),
                None => runs.values().cloned().collect(),
            }
        };
        for slot in slots {
            *lock_slot(&slot) = None;
        }
    }

    /// Delete a run's persisted log. The buffer, if any, is untouched.
    pub fn clear_run(&self, run_id: &RunId) -> QuireResult<()> {
        check_run_id(run_id)?;
        let path = self.log_path(run_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(run_id = %run_id, "trace log deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QuireError::TraceWriteFailed {
                reason: format!("failed to delete '{}': {}", path.display(), e),
            }),
        }
    }

    fn append_line(&self, run_id: &RunId, line: &str) -> QuireResult<()> {
        let path = self.log_path(run_id);
        let write_err = |e: std::io::Error| QuireError::TraceWriteFailed {
            reason: format!("failed to append to '{}': {}", path.display(), e),
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(write_err)?;
        file.write_all(format!("{}\n", line).as_bytes())
            .map_err(write_err)?;
        file.flush().map_err(write_err)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, RunSlot>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The slot for `run_id`, created empty on first use.
    fn slot(&self, run_id: &RunId) -> RunSlot {
        self.lock().entry(run_id.clone()).or_default().clone()
    }
}

fn lock_slot(slot: &RunSlot) -> MutexGuard<'_, Option<RunChain>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TraceSink for Tracer {
    fn record(&self, record: TraceRecord) -> QuireResult<TraceEntry> {
        let entry = self.sanitize(record);
        if !self.settings.enabled {
            return Ok(entry);
        }
        check_run_id(&entry.run_id).map_err(|e| QuireError::TraceWriteFailed {
            reason: e.to_string(),
        })?;

        let slot = self.slot(&entry.run_id);
        let mut guard = lock_slot(&slot);
        if guard.is_none() {
            // First write in this process, or after a flush: continue the
            // chain already on disk.
            let events = self
                .read_events(&entry.run_id)
                .map_err(|e| QuireError::TraceWriteFailed {
                    reason: e.to_string(),
                })?;
            *guard = Some(RunChain::from_events(events));
        }
        let Some(chain) = guard.as_mut() else {
            return Err(QuireError::TraceWriteFailed {
                reason: format!("no chain for run '{}'", entry.run_id),
            });
        };

        let sequence = chain.next_sequence;
        let this_hash = hash_entry(entry.run_id.as_str(), sequence, &entry, &chain.last_hash)?;
        let event = TraceEvent {
            sequence,
            entry,
            prev_hash: chain.last_hash.clone(),
            this_hash,
        };
        let line = serde_json::to_string(&event).map_err(|e| QuireError::TraceWriteFailed {
            reason: format!("could not encode trace event: {}", e),
        })?;

        self.append_line(&event.entry.run_id, &line)?;

        debug!(
            run_id = %event.entry.run_id,
            step = event.entry.step,
            sequence,
            action = %event.entry.action,
            success = event.entry.success,
            "trace entry recorded"
        );

        chain.next_sequence += 1;
        chain.last_hash = event.this_hash;
        chain.entries.push(event.entry.clone());
        Ok(event.entry)
    }

    fn entries(&self, run_id: &RunId) -> QuireResult<Vec<TraceEntry>> {
        self.get_trace(run_id)
    }
}

fn check_run_id(run_id: &RunId) -> QuireResult<()> {
    if run_id.is_path_safe() {
        Ok(())
    } else {
        Err(QuireError::TraceReadFailed {
            reason: format!("run id '{}' cannot name a trace directory", run_id),
        })
    }
}
