//! Scavenger-hunt slot board (`slots.json`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed number of image positions in a scavenger-hunt project
pub const SLOT_COUNT: usize = 12;

/// One image position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    /// 1-based position
    pub slot_index: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Per-slot clip rendered by an earlier run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn empty(slot_index: u8) -> Self {
        Self {
            slot_index,
            filename: None,
            temp_video: None,
            uploaded_at: None,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.filename.is_some()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SlotError {
    #[error("Slot must be between 1 and {max}, got {0}", max = SLOT_COUNT)]
    OutOfRange(i64),

    #[error("File '{filename}' is already assigned to slot {slot}")]
    Duplicate { filename: String, slot: u8 },
}

/// The 12 slots of a scavenger-hunt project, serialized as a bare array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotBoard {
    slots: Vec<Slot>,
}

impl Default for SlotBoard {
    fn default() -> Self {
        Self::empty()
    }
}

impl SlotBoard {
    pub fn empty() -> Self {
        Self {
            slots: (1..=SLOT_COUNT as u8).map(Slot::empty).collect(),
        }
    }

    /// Repair a board read from disk: exactly 12 slots, indexed 1..=12.
    ///
    /// Entries with out-of-range indices are dropped; missing positions
    /// come back empty.
    pub fn normalized(self) -> Self {
        let mut board = Self::empty();
        for slot in self.slots {
            let idx = slot.slot_index as usize;
            if (1..=SLOT_COUNT).contains(&idx) {
                board.slots[idx - 1] = slot;
            }
        }
        board
    }

    pub fn validate_index(slot: i64) -> Result<u8, SlotError> {
        if (1..=SLOT_COUNT as i64).contains(&slot) {
            Ok(slot as u8)
        } else {
            Err(SlotError::OutOfRange(slot))
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn get(&self, slot: u8) -> Option<&Slot> {
        self.slots.get((slot as usize).checked_sub(1)?)
    }

    pub fn occupied(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.is_occupied())
    }

    /// Slot already holding `filename`, other than `except`
    pub fn slot_holding(&self, filename: &str, except: u8) -> Option<u8> {
        self.slots
            .iter()
            .find(|s| s.slot_index != except && s.filename.as_deref() == Some(filename))
            .map(|s| s.slot_index)
    }

    /// Put `filename` into `slot`, replacing what was there.
    ///
    /// Returns the previous occupant's filename. Fails without changing the
    /// board when another slot already holds the same filename.
    pub fn assign(&mut self, slot: u8, filename: &str) -> Result<Option<String>, SlotError> {
        let index = Self::validate_index(slot as i64)?;
        if let Some(holder) = self.slot_holding(filename, index) {
            return Err(SlotError::Duplicate {
                filename: filename.to_string(),
                slot: holder,
            });
        }

        let entry = &mut self.slots[index as usize - 1];
        let previous = entry.filename.replace(filename.to_string());
        if previous.as_deref() != Some(filename) {
            // A new image invalidates the slot's pre-rendered clip
            entry.temp_video = None;
        }
        entry.uploaded_at = Some(Utc::now());
        Ok(previous)
    }

    /// Empty every slot that refers to `filename`; returns how many changed.
    pub fn clear_file(&mut self, filename: &str) -> usize {
        let mut cleared = 0;
        for slot in self.slots.iter_mut() {
            if slot.filename.as_deref() == Some(filename) {
                *slot = Slot::empty(slot.slot_index);
                cleared += 1;
            }
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_board_has_twelve_slots() {
        let board = SlotBoard::empty();
        assert_eq!(board.slots().len(), SLOT_COUNT);
        assert_eq!(board.slots()[0].slot_index, 1);
        assert_eq!(board.slots()[11].slot_index, 12);
        assert_eq!(board.occupied().count(), 0);
    }

    #[test]
    fn test_assign_and_replace() {
        let mut board = SlotBoard::empty();
        assert_eq!(board.assign(3, "a.jpg").unwrap(), None);
        assert_eq!(board.assign(3, "b.jpg").unwrap(), Some("a.jpg".to_string()));
        assert_eq!(board.get(3).and_then(|s| s.filename.clone()), Some("b.jpg".to_string()));
    }

    #[test]
    fn test_duplicate_filename_rejected_without_mutation() {
        let mut board = SlotBoard::empty();
        board.assign(1, "dup.jpg").unwrap();
        let before = board.clone();

        let err = board.assign(2, "dup.jpg").unwrap_err();
        assert_eq!(
            err,
            SlotError::Duplicate {
                filename: "dup.jpg".to_string(),
                slot: 1
            }
        );
        assert_eq!(board, before);
    }

    #[test]
    fn test_reassigning_same_file_to_same_slot_is_allowed() {
        let mut board = SlotBoard::empty();
        board.assign(5, "same.jpg").unwrap();
        assert!(board.assign(5, "same.jpg").is_ok());
    }

    #[test]
    fn test_out_of_range_slots() {
        assert_eq!(SlotBoard::validate_index(0), Err(SlotError::OutOfRange(0)));
        assert_eq!(SlotBoard::validate_index(13), Err(SlotError::OutOfRange(13)));
        assert_eq!(SlotBoard::validate_index(12), Ok(12));
        assert!(SlotBoard::empty().assign(0, "x.jpg").is_err());
    }

    #[test]
    fn test_normalized_repairs_short_board() {
        let json = r#"[{"slotIndex":2,"filename":"b.jpg"},{"slotIndex":40,"filename":"z.jpg"}]"#;
        let board: SlotBoard = serde_json::from_str(json).unwrap();
        let board = board.normalized();

        assert_eq!(board.slots().len(), SLOT_COUNT);
        assert_eq!(board.get(2).and_then(|s| s.filename.as_deref()), Some("b.jpg"));
        assert_eq!(board.occupied().count(), 1);
    }

    #[test]
    fn test_clear_file() {
        let mut board = SlotBoard::empty();
        board.assign(4, "gone.jpg").unwrap();
        assert_eq!(board.clear_file("gone.jpg"), 1);
        assert!(!board.get(4).unwrap().is_occupied());
    }
}
