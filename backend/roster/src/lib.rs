//! # Roster
//!
//! A fixed roster of 29 named slots, each with a like counter, kept in one
//! document per user.
//!
//! ## Modules
//! - [`document`]: stored shape, typed slot and field names
//! - [`store`]: document store port and the in-process store
//! - [`state`]: what an open page holds, including the reset gestures
//! - [`sync`]: optimistic local edits mirrored to the store
//! - [`session`]: signed session tokens
pub mod document;
pub mod error;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;

pub use document::{Field, Patch, Record, RosterDocument, SLOT_COUNT, SlotIndex};
pub use error::{RosterError, SessionError, StoreError};
pub use session::{HmacSessions, Identity, SessionVerifier};
pub use state::{LocalRosterState, ResetState, RosterView, SlotView};
pub use store::{DocRef, DocumentStore, MemoryStore};
pub use sync::{
    PageEvent, RetryPolicy, RosterEvent, Synchronizer, WriteOutcome, WriteReport, WriteReports,
};
