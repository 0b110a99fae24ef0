//! # Roster Document
//!
//! Stored shape of one user's roster.
//!
//! ## Schema
//! - `created_at`: timestamp, written once when the document is first materialized
//! - `updated_at`: timestamp or null, refreshed on every mutation
//! - `memberName{i}`: **string**, default empty, for each slot `i` in `0..29`
//! - `like{i}`: **int**, default 0, for each slot `i` in `0..29`
//!
//! The indexed spelling only exists at the record boundary. Everywhere else
//! slots are addressed through [`SlotIndex`] and fields through [`Field`].
use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RosterError, StoreError};

pub const SLOT_COUNT: usize = 29;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const MEMBER_NAME_PREFIX: &str = "memberName";
pub const LIKE_PREFIX: &str = "like";

pub type Timestamp = DateTime<FixedOffset>;

/// Field name to JSON value, the unit the document store reads and writes.
pub type Record = Map<String, Value>;

pub fn now() -> Timestamp {
    Local::now().fixed_offset()
}

pub fn format_timestamp(timestamp: &Timestamp) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Position of a slot in the roster, always below [`SLOT_COUNT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct SlotIndex(u8);

impl SlotIndex {
    pub fn new(index: usize) -> Result<Self, RosterError> {
        if index < SLOT_COUNT {
            Ok(Self(index as u8))
        } else {
            Err(RosterError::SlotOutOfRange(index))
        }
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = SlotIndex> {
        (0..SLOT_COUNT as u8).map(SlotIndex)
    }
}

impl TryFrom<usize> for SlotIndex {
    type Error = RosterError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::new(index)
    }
}

impl From<SlotIndex> for usize {
    fn from(slot: SlotIndex) -> Self {
        slot.get()
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    CreatedAt,
    UpdatedAt,
    MemberName(SlotIndex),
    Like(SlotIndex),
}

impl Field {
    pub fn slot(self) -> Option<SlotIndex> {
        match self {
            Field::MemberName(slot) | Field::Like(slot) => Some(slot),
            Field::CreatedAt | Field::UpdatedAt => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::CreatedAt => f.write_str(CREATED_AT),
            Field::UpdatedAt => f.write_str(UPDATED_AT),
            Field::MemberName(slot) => write!(f, "{MEMBER_NAME_PREFIX}{slot}"),
            Field::Like(slot) => write!(f, "{LIKE_PREFIX}{slot}"),
        }
    }
}

impl FromStr for Field {
    type Err = RosterError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let unknown = || RosterError::UnknownField(name.to_string());

        let parse_slot = |digits: &str| -> Result<SlotIndex, RosterError> {
            // "like05" and "like+5" are not field names
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(unknown());
            }
            if digits.len() > 1 && digits.starts_with('0') {
                return Err(unknown());
            }
            let index: usize = digits.parse().map_err(|_| unknown())?;
            SlotIndex::new(index)
        };

        match name {
            CREATED_AT => Ok(Field::CreatedAt),
            UPDATED_AT => Ok(Field::UpdatedAt),
            _ => {
                if let Some(digits) = name.strip_prefix(MEMBER_NAME_PREFIX) {
                    parse_slot(digits).map(Field::MemberName)
                } else if let Some(digits) = name.strip_prefix(LIKE_PREFIX) {
                    parse_slot(digits).map(Field::Like)
                } else {
                    Err(unknown())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    pub name: String,
    pub likes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterDocument {
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
    pub slots: [Slot; SLOT_COUNT],
}

impl RosterDocument {
    /// Empty names and zero counts, as written on the first read-miss.
    pub fn fresh(created_at: Timestamp) -> Self {
        Self {
            created_at,
            updated_at: None,
            slots: std::array::from_fn(|_| Slot::default()),
        }
    }

    pub fn slot(&self, slot: SlotIndex) -> &Slot {
        &self.slots[slot.get()]
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(
            CREATED_AT.to_string(),
            Value::String(format_timestamp(&self.created_at)),
        );
        record.insert(
            UPDATED_AT.to_string(),
            self.updated_at
                .as_ref()
                .map_or(Value::Null, |t| Value::String(format_timestamp(t))),
        );

        for slot in SlotIndex::all() {
            let Slot { name, likes } = self.slot(slot);
            record.insert(
                Field::MemberName(slot).to_string(),
                Value::String(name.clone()),
            );
            record.insert(Field::Like(slot).to_string(), Value::from(*likes));
        }

        record
    }

    /// Missing slot fields fall back to their defaults, wrongly typed ones are rejected.
    pub fn from_record(record: &Record) -> Result<Self, StoreError> {
        let created_at = match record.get(CREATED_AT) {
            Some(value) => read_timestamp(CREATED_AT, value)?
                .ok_or_else(|| malformed(CREATED_AT, "must not be null"))?,
            None => return Err(malformed(CREATED_AT, "missing")),
        };

        let updated_at = match record.get(UPDATED_AT) {
            Some(value) => read_timestamp(UPDATED_AT, value)?,
            None => None,
        };

        let mut document = Self::fresh(created_at);
        document.updated_at = updated_at;

        for slot in SlotIndex::all() {
            let name_field = Field::MemberName(slot).to_string();
            match record.get(&name_field) {
                Some(Value::String(name)) => document.slots[slot.get()].name = name.clone(),
                Some(Value::Null) | None => {}
                Some(_) => return Err(malformed(&name_field, "expected a string")),
            }

            let like_field = Field::Like(slot).to_string();
            match record.get(&like_field) {
                Some(Value::Number(number)) => {
                    let likes = number
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| malformed(&like_field, "expected a non-negative integer"))?;
                    document.slots[slot.get()].likes = likes;
                }
                Some(Value::Null) | None => {}
                Some(_) => return Err(malformed(&like_field, "expected a number")),
            }
        }

        Ok(document)
    }
}

fn malformed(field: &str, reason: &str) -> StoreError {
    StoreError::Malformed {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn read_timestamp(field: &str, value: &Value) -> Result<Option<Timestamp>, StoreError> {
    match value {
        Value::Null => Ok(None),
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(Some)
            .map_err(|e| malformed(field, &e.to_string())),
        _ => Err(malformed(field, "expected a timestamp string")),
    }
}

/// Partial update of slot fields plus the refreshed `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    updated_at: Timestamp,
    names: BTreeMap<SlotIndex, String>,
    likes: BTreeMap<SlotIndex, u32>,
}

impl Patch {
    pub fn new(updated_at: Timestamp) -> Self {
        Self {
            updated_at,
            names: BTreeMap::new(),
            likes: BTreeMap::new(),
        }
    }

    pub fn name(mut self, slot: SlotIndex, name: impl Into<String>) -> Self {
        self.names.insert(slot, name.into());
        self
    }

    pub fn likes(mut self, slot: SlotIndex, likes: u32) -> Self {
        self.likes.insert(slot, likes);
        self
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Slot fields carried by this patch. `updated_at` is implied.
    pub fn fields(&self) -> Vec<Field> {
        self.names
            .keys()
            .map(|&slot| Field::MemberName(slot))
            .chain(self.likes.keys().map(|&slot| Field::Like(slot)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.likes.is_empty()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(Field) -> bool) {
        self.names.retain(|&slot, _| keep(Field::MemberName(slot)));
        self.likes.retain(|&slot, _| keep(Field::Like(slot)));
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();

        for (&slot, name) in &self.names {
            record.insert(
                Field::MemberName(slot).to_string(),
                Value::String(name.clone()),
            );
        }
        for (&slot, &likes) in &self.likes {
            record.insert(Field::Like(slot).to_string(), Value::from(likes));
        }

        record.insert(
            UPDATED_AT.to_string(),
            Value::String(format_timestamp(&self.updated_at)),
        );

        record
    }
}
