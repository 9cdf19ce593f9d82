//! Sequence number assignment.
//!
//! A writer numbers messages in exactly one of two modes, pinned by the
//! first write: `Auto` (the writer counts up from the server's last known
//! seqNo) or `Manual` (the caller supplies strictly increasing seqNos).
//! Mixing modes after pinning is an error.

use ydbx_core::{Error, Result};

/// How seqNos are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqNoMode {
    /// The writer assigns consecutive seqNos.
    Auto,
    /// The caller assigns seqNos; each must exceed the previous.
    Manual,
}

/// Tracks the writer's seqNo state.
#[derive(Debug, Default)]
pub struct SeqNoManager {
    mode: Option<SeqNoMode>,
    /// Last seqNo handed out (either assigned or validated).
    last_seq_no: i64,
    /// Highest caller-supplied seqNo; manual mode only.
    highest_user_seq_no: i64,
}

impl SeqNoManager {
    /// The pinned mode, `None` until the first write.
    pub fn mode(&self) -> Option<SeqNoMode> {
        self.mode
    }

    pub fn last_seq_no(&self) -> i64 {
        self.last_seq_no
    }

    pub fn next_seq_no(&self) -> i64 {
        self.last_seq_no + 1
    }

    /// Assign a seqNo to the next message. Pins the mode on first use.
    pub fn assign(&mut self, user_seq_no: Option<i64>) -> Result<i64> {
        let mode = *self.mode.get_or_insert(match user_seq_no {
            Some(_) => SeqNoMode::Manual,
            None => SeqNoMode::Auto,
        });
        match (mode, user_seq_no) {
            (SeqNoMode::Auto, None) => {
                self.last_seq_no += 1;
                Ok(self.last_seq_no)
            }
            (SeqNoMode::Manual, Some(seq_no)) => {
                if seq_no <= self.highest_user_seq_no {
                    return Err(Error::SeqNoRegression {
                        seq_no,
                        highest: self.highest_user_seq_no,
                    });
                }
                self.highest_user_seq_no = seq_no;
                self.last_seq_no = seq_no;
                Ok(seq_no)
            }
            _ => Err(Error::SeqNoModeConflict),
        }
    }

    /// Realign after init reconciliation renumbered the window (auto mode)
    /// or confirmed the server's last persisted seqNo.
    pub fn set_last_seq_no(&mut self, last_seq_no: i64) {
        self.last_seq_no = last_seq_no;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_mode_counts_up() {
        let mut manager = SeqNoManager::default();
        assert_eq!(manager.mode(), None);
        assert_eq!(manager.assign(None).unwrap(), 1);
        assert_eq!(manager.assign(None).unwrap(), 2);
        assert_eq!(manager.mode(), Some(SeqNoMode::Auto));
        assert_eq!(manager.next_seq_no(), 3);
    }

    #[test]
    fn manual_mode_validates_monotonicity() {
        let mut manager = SeqNoManager::default();
        assert_eq!(manager.assign(Some(10)).unwrap(), 10);
        assert_eq!(manager.mode(), Some(SeqNoMode::Manual));
        // Gaps are allowed, regressions and repeats are not.
        assert_eq!(manager.assign(Some(15)).unwrap(), 15);
        assert!(matches!(
            manager.assign(Some(15)),
            Err(Error::SeqNoRegression {
                seq_no: 15,
                highest: 15
            })
        ));
        assert!(matches!(
            manager.assign(Some(3)),
            Err(Error::SeqNoRegression { .. })
        ));
        // A failed assign does not advance the state.
        assert_eq!(manager.assign(Some(16)).unwrap(), 16);
    }

    #[test]
    fn mode_cannot_switch_once_pinned() {
        let mut manager = SeqNoManager::default();
        manager.assign(None).unwrap();
        assert!(matches!(
            manager.assign(Some(5)),
            Err(Error::SeqNoModeConflict)
        ));

        let mut manager = SeqNoManager::default();
        manager.assign(Some(5)).unwrap();
        assert!(matches!(manager.assign(None), Err(Error::SeqNoModeConflict)));
    }

    #[test]
    fn rebase_moves_auto_numbering() {
        let mut manager = SeqNoManager::default();
        manager.assign(None).unwrap();
        manager.assign(None).unwrap();
        manager.set_last_seq_no(45);
        assert_eq!(manager.assign(None).unwrap(), 46);
    }
}
