//! # Local Roster State
//!
//! What one open page holds in memory.
//!
//! ## Flow
//!
//! - Starts in [`LocalRosterState::Loading`], nothing is editable
//! - Becomes [`LocalRosterState::Ready`] once the document is read or created
//! - Every mutation lands here first and returns the [`Patch`] to mirror remotely
//!
//! ## Reset Gestures
//!
//! - Each slot has its own `Idle -> Confirming -> Idle` machine
//! - The whole roster has one more, independent of the slot machines
//! - Committing the whole-roster reset also returns every slot to `Idle`
//! - Committing a slot reset leaves the whole-roster machine alone
use serde::Serialize;

use crate::{
    document::{Patch, RosterDocument, SLOT_COUNT, SlotIndex, Timestamp},
    error::RosterError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetState {
    #[default]
    Idle,
    Confirming,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotState {
    pub name: String,
    pub likes: u32,
    pub reset: ResetState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    slots: [SlotState; SLOT_COUNT],
    roster_reset: ResetState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LocalRosterState {
    #[default]
    Loading,
    Ready(Roster),
}

impl Roster {
    pub fn from_document(document: &RosterDocument) -> Self {
        Self {
            slots: std::array::from_fn(|i| SlotState {
                name: document.slots[i].name.clone(),
                likes: document.slots[i].likes,
                reset: ResetState::Idle,
            }),
            roster_reset: ResetState::Idle,
        }
    }

    pub fn slot(&self, slot: SlotIndex) -> &SlotState {
        &self.slots[slot.get()]
    }

    pub fn slots(&self) -> &[SlotState; SLOT_COUNT] {
        &self.slots
    }

    pub fn roster_reset(&self) -> ResetState {
        self.roster_reset
    }

    fn slot_mut(&mut self, slot: SlotIndex) -> &mut SlotState {
        &mut self.slots[slot.get()]
    }

    pub fn rename(&mut self, slot: SlotIndex, name: String, at: Timestamp) -> Patch {
        let patch = Patch::new(at).name(slot, name.clone());
        self.slot_mut(slot).name = name;
        patch
    }

    pub fn increment(&mut self, slot: SlotIndex, at: Timestamp) -> Patch {
        let state = self.slot_mut(slot);
        state.likes = state.likes.saturating_add(1);
        Patch::new(at).likes(slot, state.likes)
    }

    /// Floors at zero. The remote still receives the (unchanged) target value.
    pub fn decrement(&mut self, slot: SlotIndex, at: Timestamp) -> Patch {
        let state = self.slot_mut(slot);
        if state.likes != 0 {
            state.likes -= 1;
        }
        Patch::new(at).likes(slot, state.likes)
    }

    pub fn confirm_reset(&mut self, slot: SlotIndex) {
        self.slot_mut(slot).reset = ResetState::Confirming;
    }

    pub fn cancel_reset(&mut self, slot: SlotIndex) {
        self.slot_mut(slot).reset = ResetState::Idle;
    }

    pub fn reset(&mut self, slot: SlotIndex, at: Timestamp) -> Result<Patch, RosterError> {
        let state = self.slot_mut(slot);
        if state.reset != ResetState::Confirming {
            return Err(RosterError::ResetNotConfirmed(slot));
        }

        state.likes = 0;
        state.reset = ResetState::Idle;
        Ok(Patch::new(at).likes(slot, 0))
    }

    pub fn confirm_reset_all(&mut self) {
        self.roster_reset = ResetState::Confirming;
    }

    pub fn cancel_reset_all(&mut self) {
        self.roster_reset = ResetState::Idle;
    }

    pub fn reset_all(&mut self, at: Timestamp) -> Result<Patch, RosterError> {
        if self.roster_reset != ResetState::Confirming {
            return Err(RosterError::RosterResetNotConfirmed);
        }

        self.roster_reset = ResetState::Idle;
        let mut patch = Patch::new(at);
        for slot in SlotIndex::all() {
            let state = self.slot_mut(slot);
            state.likes = 0;
            state.reset = ResetState::Idle;
            patch = patch.likes(slot, 0);
        }

        Ok(patch)
    }
}

impl LocalRosterState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LocalRosterState::Ready(_))
    }

    pub fn roster(&self) -> Result<&Roster, RosterError> {
        match self {
            LocalRosterState::Ready(roster) => Ok(roster),
            LocalRosterState::Loading => Err(RosterError::NotLoaded),
        }
    }

    pub fn roster_mut(&mut self) -> Result<&mut Roster, RosterError> {
        match self {
            LocalRosterState::Ready(roster) => Ok(roster),
            LocalRosterState::Loading => Err(RosterError::NotLoaded),
        }
    }

    /// Empty while loading, always [`SLOT_COUNT`] long.
    pub fn names(&self) -> Vec<String> {
        match self {
            LocalRosterState::Ready(roster) => roster.slots.iter().map(|s| s.name.clone()).collect(),
            LocalRosterState::Loading => vec![String::new(); SLOT_COUNT],
        }
    }

    pub fn counts(&self) -> Vec<u32> {
        match self {
            LocalRosterState::Ready(roster) => roster.slots.iter().map(|s| s.likes).collect(),
            LocalRosterState::Loading => vec![0; SLOT_COUNT],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub index: usize,
    pub name: String,
    /// `None` while loading.
    pub likes: Option<u32>,
    pub reset: ResetState,
    pub unsynced: bool,
}

/// Serializable snapshot handed to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterView {
    pub loaded: bool,
    pub slots: Vec<SlotView>,
    pub roster_reset: ResetState,
}

impl RosterView {
    pub fn new(state: &LocalRosterState, unsynced: impl Fn(SlotIndex) -> bool) -> Self {
        match state {
            LocalRosterState::Loading => Self {
                loaded: false,
                slots: SlotIndex::all()
                    .map(|slot| SlotView {
                        index: slot.get(),
                        name: String::new(),
                        likes: None,
                        reset: ResetState::Idle,
                        unsynced: false,
                    })
                    .collect(),
                roster_reset: ResetState::Idle,
            },
            LocalRosterState::Ready(roster) => Self {
                loaded: true,
                slots: SlotIndex::all()
                    .map(|slot| {
                        let state = roster.slot(slot);
                        SlotView {
                            index: slot.get(),
                            name: state.name.clone(),
                            likes: Some(state.likes),
                            reset: state.reset,
                            unsynced: unsynced(slot),
                        }
                    })
                    .collect(),
                roster_reset: roster.roster_reset,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::document::{Field, now};

    use super::*;

    fn slot(index: usize) -> SlotIndex {
        SlotIndex::new(index).unwrap()
    }

    fn roster() -> Roster {
        Roster::from_document(&RosterDocument::fresh(now()))
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        let mut roster = roster();

        for slot in SlotIndex::all() {
            let patch = roster.decrement(slot, now());
            assert_eq!(roster.slot(slot).likes, 0);
            assert_eq!(patch.fields(), vec![Field::Like(slot)]);
        }
    }

    #[test]
    fn test_increment_then_decrement() {
        let mut roster = roster();
        roster.increment(slot(3), now());
        roster.increment(slot(3), now());

        roster.increment(slot(3), now());
        roster.decrement(slot(3), now());

        assert_eq!(roster.slot(slot(3)).likes, 2);
    }

    #[test]
    fn test_reset_requires_confirmation() {
        let mut roster = roster();
        roster.increment(slot(1), now());

        assert!(matches!(
            roster.reset(slot(1), now()),
            Err(RosterError::ResetNotConfirmed(s)) if s == slot(1)
        ));
        assert_eq!(roster.slot(slot(1)).likes, 1);

        roster.confirm_reset(slot(1));
        roster.reset(slot(1), now()).unwrap();
        assert_eq!(roster.slot(slot(1)).likes, 0);
        assert_eq!(roster.slot(slot(1)).reset, ResetState::Idle);
    }

    #[test]
    fn test_slot_confirmations_are_independent() {
        let mut roster = roster();
        roster.confirm_reset(slot(0));
        roster.confirm_reset(slot(7));
        roster.cancel_reset(slot(0));

        assert_eq!(roster.slot(slot(0)).reset, ResetState::Idle);
        assert_eq!(roster.slot(slot(7)).reset, ResetState::Confirming);
        assert_eq!(roster.roster_reset(), ResetState::Idle);
    }

    #[test]
    fn test_reset_all_clears_slot_confirmations() {
        let mut roster = roster();
        roster.increment(slot(2), now());
        roster.confirm_reset(slot(4));
        roster.confirm_reset_all();

        let patch = roster.reset_all(now()).unwrap();

        assert_eq!(patch.fields().len(), SLOT_COUNT);
        assert!(roster.slots().iter().all(|s| s.likes == 0 && s.reset == ResetState::Idle));
        assert_eq!(roster.roster_reset(), ResetState::Idle);
    }

    #[test]
    fn test_slot_reset_keeps_roster_confirmation() {
        let mut roster = roster();
        roster.confirm_reset_all();
        roster.confirm_reset(slot(9));
        roster.reset(slot(9), now()).unwrap();

        assert_eq!(roster.roster_reset(), ResetState::Confirming);
    }

    #[test]
    fn test_loading_state() {
        let mut state = LocalRosterState::Loading;

        assert!(!state.is_loaded());
        assert!(matches!(state.roster_mut(), Err(RosterError::NotLoaded)));
        assert_eq!(state.names().len(), SLOT_COUNT);
        assert_eq!(state.counts(), vec![0; SLOT_COUNT]);

        let view = RosterView::new(&state, |_| true);
        assert!(!view.loaded);
        assert!(view.slots.iter().all(|s| s.likes.is_none() && !s.unsynced));
    }
}
