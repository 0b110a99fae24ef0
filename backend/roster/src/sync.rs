//! # Synchronizer
//!
//! Keeps one page's [`LocalRosterState`] and the user's remote document in step.
//!
//! ## Protocol
//!
//! - `load` reads the document once, writing a fresh one on a miss
//! - Every edit mutates local state first and returns right away
//! - The matching field update is spawned onto the runtime and never awaited by the caller
//! - Each update captures its values at call time, in-flight writes are never cancelled
//! - Writes can land out of order, the last one to land wins per field
//!
//! ## Acknowledgment
//!
//! - Every update gets a sequence number and an entry per field in the [`WriteLedger`]
//! - Retryable failures are retried with exponential backoff
//! - Fields overwritten by a newer update are dropped before a retry
//! - The outcome of every update is sent on the [`WriteReports`] channel
//! - Local state is never rolled back
use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    document::{Field, Patch, RosterDocument, SlotIndex, now},
    error::{RosterError, StoreError},
    state::{LocalRosterState, Roster, RosterView},
    store::{DocRef, DocumentStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one, at least 1.
    pub attempts: u32,
    /// Delay before the first retry, doubled for every following one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStatus {
    Pending,
    Synced,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct FieldEntry {
    latest: u64,
    status: FieldStatus,
}

/// Latest issued write per slot field and how it ended.
#[derive(Debug, Default)]
pub struct WriteLedger {
    fields: HashMap<Field, FieldEntry>,
}

impl WriteLedger {
    fn issue(&mut self, seq: u64, fields: &[Field]) {
        for &field in fields {
            self.fields.insert(
                field,
                FieldEntry {
                    latest: seq,
                    status: FieldStatus::Pending,
                },
            );
        }
    }

    fn is_latest(&self, field: Field, seq: u64) -> bool {
        self.fields.get(&field).is_some_and(|entry| entry.latest == seq)
    }

    /// Only settles fields this write is still the latest for.
    fn settle(&mut self, seq: u64, fields: &[Field], status: FieldStatus) {
        for field in fields {
            if let Some(entry) = self.fields.get_mut(field) {
                if entry.latest == seq {
                    entry.status = status;
                }
            }
        }
    }

    pub fn status(&self, field: Field) -> Option<FieldStatus> {
        self.fields.get(&field).map(|entry| entry.status)
    }

    pub fn is_unsynced(&self, slot: SlotIndex) -> bool {
        [Field::MemberName(slot), Field::Like(slot)]
            .into_iter()
            .any(|field| {
                matches!(
                    self.status(field),
                    Some(FieldStatus::Pending | FieldStatus::Failed)
                )
            })
    }
}

#[derive(Debug)]
pub enum WriteOutcome {
    Applied { attempts: u32 },
    /// Every field was overwritten by a newer write before a retry.
    Superseded,
    Failed(StoreError),
}

#[derive(Debug)]
pub struct WriteReport {
    pub seq: u64,
    pub fields: Vec<Field>,
    pub outcome: WriteOutcome,
}

pub type WriteReports = UnboundedReceiver<WriteReport>;

/// UI events the page can raise, one per roster operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RosterEvent {
    Rename { slot: SlotIndex, name: String },
    Increment { slot: SlotIndex },
    Decrement { slot: SlotIndex },
    ConfirmReset { slot: SlotIndex },
    Reset { slot: SlotIndex },
    CancelReset { slot: SlotIndex },
    ConfirmResetAll,
    ResetAll,
    CancelResetAll,
}

/// An event numbered by the page that raised it. Numbers must increase.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub event: RosterEvent,
}

struct Writer {
    store: Arc<dyn DocumentStore>,
    doc: DocRef,
    retry: RetryPolicy,
    ledger: Arc<Mutex<WriteLedger>>,
    reports: UnboundedSender<WriteReport>,
    next_seq: u64,
}

impl Writer {
    /// Fire-and-forget. Requires a running tokio runtime.
    fn dispatch(&mut self, patch: Patch) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        let fields = patch.fields();

        self.ledger.lock().issue(seq, &fields);
        debug!("Dispatching write {seq} to {} for {} field(s)", self.doc, fields.len());

        tokio::spawn(deliver(
            self.store.clone(),
            self.doc.clone(),
            self.retry,
            self.ledger.clone(),
            self.reports.clone(),
            seq,
            patch,
        ));

        seq
    }
}

async fn deliver(
    store: Arc<dyn DocumentStore>,
    doc: DocRef,
    retry: RetryPolicy,
    ledger: Arc<Mutex<WriteLedger>>,
    reports: UnboundedSender<WriteReport>,
    seq: u64,
    mut patch: Patch,
) {
    let fields = patch.fields();
    let mut attempt = 0;

    let outcome = loop {
        attempt += 1;

        match store.update(&doc, patch.to_record()).await {
            Ok(()) => break WriteOutcome::Applied { attempts: attempt },
            Err(e) if e.is_retryable() && attempt < retry.attempts => {
                warn!("Write {seq} to {doc} failed on attempt {attempt}: {e}");
                sleep(retry.delay(attempt)).await;

                {
                    let ledger = ledger.lock();
                    patch.retain(|field| ledger.is_latest(field, seq));
                }
                if patch.is_empty() {
                    break WriteOutcome::Superseded;
                }
            }
            Err(e) => {
                warn!("Write {seq} to {doc} abandoned after {attempt} attempt(s): {e}");
                break WriteOutcome::Failed(e);
            }
        }
    };

    let status = match outcome {
        WriteOutcome::Applied { .. } => FieldStatus::Synced,
        WriteOutcome::Superseded => FieldStatus::Pending,
        WriteOutcome::Failed(_) => FieldStatus::Failed,
    };
    // Superseded fields belong to a newer write, settle is a no-op for them.
    ledger.lock().settle(seq, &fields, status);

    // Nobody listening is fine.
    let _ = reports.send(WriteReport {
        seq,
        fields,
        outcome,
    });
}

pub struct Synchronizer {
    doc: DocRef,
    state: LocalRosterState,
    writer: Writer,
    last_event: u64,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        doc: DocRef,
        retry: RetryPolicy,
    ) -> (Self, WriteReports) {
        let (reports, receiver) = unbounded_channel();

        let synchronizer = Self {
            doc: doc.clone(),
            state: LocalRosterState::Loading,
            writer: Writer {
                store,
                doc,
                retry: RetryPolicy {
                    attempts: retry.attempts.max(1),
                    ..retry
                },
                ledger: Arc::new(Mutex::new(WriteLedger::default())),
                reports,
                next_seq: 0,
            },
            last_event: 0,
        };

        (synchronizer, receiver)
    }

    pub fn doc(&self) -> &DocRef {
        &self.doc
    }

    pub fn state(&self) -> &LocalRosterState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    /// One read, plus one full write on a miss. Failures leave the state loading.
    ///
    /// Calling again re-reads the document and drops pending confirmations.
    pub async fn load(&mut self) -> Result<(), RosterError> {
        let store = self.writer.store.clone();

        let document = match store.get(&self.doc).await? {
            Some(record) => RosterDocument::from_record(&record)?,
            None => {
                let document = RosterDocument::fresh(now());
                store.set(&self.doc, document.to_record()).await?;
                info!("Created roster document {}", self.doc);
                document
            }
        };

        self.state = LocalRosterState::Ready(Roster::from_document(&document));
        Ok(())
    }

    fn roster_mut(&mut self) -> Result<&mut Roster, RosterError> {
        self.state.roster_mut()
    }

    pub fn rename(&mut self, slot: SlotIndex, name: impl Into<String>) -> Result<(), RosterError> {
        let patch = self.roster_mut()?.rename(slot, name.into(), now());
        self.writer.dispatch(patch);
        Ok(())
    }

    pub fn increment(&mut self, slot: SlotIndex) -> Result<u32, RosterError> {
        let patch = self.roster_mut()?.increment(slot, now());
        self.writer.dispatch(patch);
        Ok(self.state.roster()?.slot(slot).likes)
    }

    pub fn decrement(&mut self, slot: SlotIndex) -> Result<u32, RosterError> {
        let patch = self.roster_mut()?.decrement(slot, now());
        self.writer.dispatch(patch);
        Ok(self.state.roster()?.slot(slot).likes)
    }

    pub fn confirm_reset(&mut self, slot: SlotIndex) -> Result<(), RosterError> {
        self.roster_mut()?.confirm_reset(slot);
        Ok(())
    }

    pub fn reset(&mut self, slot: SlotIndex) -> Result<(), RosterError> {
        let patch = self.roster_mut()?.reset(slot, now())?;
        self.writer.dispatch(patch);
        Ok(())
    }

    pub fn cancel_reset(&mut self, slot: SlotIndex) -> Result<(), RosterError> {
        self.roster_mut()?.cancel_reset(slot);
        Ok(())
    }

    pub fn confirm_reset_all(&mut self) -> Result<(), RosterError> {
        self.roster_mut()?.confirm_reset_all();
        Ok(())
    }

    /// One batched update for all slots.
    pub fn reset_all(&mut self) -> Result<(), RosterError> {
        let patch = self.roster_mut()?.reset_all(now())?;
        self.writer.dispatch(patch);
        Ok(())
    }

    pub fn cancel_reset_all(&mut self) -> Result<(), RosterError> {
        self.roster_mut()?.cancel_reset_all();
        Ok(())
    }

    pub fn apply(&mut self, event: RosterEvent) -> Result<(), RosterError> {
        match event {
            RosterEvent::Rename { slot, name } => self.rename(slot, name),
            RosterEvent::Increment { slot } => self.increment(slot).map(|_| ()),
            RosterEvent::Decrement { slot } => self.decrement(slot).map(|_| ()),
            RosterEvent::ConfirmReset { slot } => self.confirm_reset(slot),
            RosterEvent::Reset { slot } => self.reset(slot),
            RosterEvent::CancelReset { slot } => self.cancel_reset(slot),
            RosterEvent::ConfirmResetAll => self.confirm_reset_all(),
            RosterEvent::ResetAll => self.reset_all(),
            RosterEvent::CancelResetAll => self.cancel_reset_all(),
        }
    }

    /// Applies `event` unless a later event from the page was already seen.
    ///
    /// The number is consumed even when the event itself is rejected.
    pub fn apply_page_event(&mut self, event: PageEvent) -> Result<(), RosterError> {
        if event.seq <= self.last_event {
            return Err(RosterError::StaleEvent {
                seq: event.seq,
                last: self.last_event,
            });
        }
        self.last_event = event.seq;

        self.apply(event.event)
    }

    pub fn unsynced(&self, slot: SlotIndex) -> bool {
        self.writer.ledger.lock().is_unsynced(slot)
    }

    pub fn field_status(&self, field: Field) -> Option<FieldStatus> {
        self.writer.ledger.lock().status(field)
    }

    pub fn view(&self) -> RosterView {
        let ledger = self.writer.ledger.lock();
        RosterView::new(&self.state, |slot| ledger.is_unsynced(slot))
    }
}
