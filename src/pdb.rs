//! The piece database: in-memory state of which pieces are pending,
//! in-progress or done, and which blocks are checked out to peers.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    block::Block,
    error::FatalError,
    messages::ChokeNotification,
    piece_map::{PieceMap, PieceNum},
};

/// A piece that has been opened for download but isn't complete yet.
#[derive(Debug, Clone)]
pub struct InProgressPiece {
    pub total_blocks: usize,
    pub have_blocks: HashSet<Block>,
    pub pending_blocks: VecDeque<Block>,
}

impl InProgressPiece {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            total_blocks: blocks.len(),
            have_blocks: HashSet::new(),
            pending_blocks: blocks.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.have_blocks.len() == self.total_blocks
    }
}

#[derive(Debug)]
pub struct PieceDb {
    pub pending: HashSet<PieceNum>,
    pub done: HashSet<PieceNum>,
    pub in_progress: HashMap<PieceNum, InProgressPiece>,
    pub downloading: Vec<(PieceNum, Block)>,
    pub done_push_queue: VecDeque<ChokeNotification>,
    pub endgame: bool,
    pub assert_countdown: u32,
}

impl PieceDb {
    /// Builds a fresh database from the filesystem collaborator's initial
    /// scan: `pending` gets every `PieceNum` mapped to `false`, `done` gets
    /// every one mapped to `true`, everything else starts empty.
    pub fn create(pieces_done: &[bool], piece_map: &PieceMap) -> Self {
        debug_assert_eq!(pieces_done.len(), piece_map.len());
        let mut pending = HashSet::new();
        let mut done = HashSet::new();
        for (pn, &is_done) in pieces_done.iter().enumerate() {
            if is_done {
                done.insert(pn);
            } else {
                pending.insert(pn);
            }
        }
        Self {
            pending,
            done,
            in_progress: HashMap::new(),
            downloading: Vec::new(),
            done_push_queue: VecDeque::new(),
            endgame: false,
            assert_countdown: 0,
        }
    }

    pub fn is_torrent_complete(&self, total_pieces: usize) -> bool {
        self.done.len() == total_pieces
    }

    /// Invariants (1)-(5) of the data model, checked in one pass. Returns
    /// the first violation found; callers treat any `Err` as fatal.
    pub fn audit(&self) -> Result<(), FatalError> {
        // (1) pending, done, in_progress keys pairwise disjoint.
        let overlap: Vec<PieceNum> = self
            .pending
            .intersection(&self.done)
            .copied()
            .chain(
                self.pending
                    .iter()
                    .copied()
                    .filter(|pn| self.in_progress.contains_key(pn)),
            )
            .chain(
                self.done
                    .iter()
                    .copied()
                    .filter(|pn| self.in_progress.contains_key(pn)),
            )
            .collect();
        if !overlap.is_empty() {
            return Err(FatalError::new(
                "I1-disjoint-sets",
                "pending/done/in_progress are not pairwise disjoint",
                overlap,
            ));
        }

        // (2) every pn in downloading is a key of in_progress; no done
        // piece appears in downloading.
        for (pn, _) in &self.downloading {
            if self.done.contains(pn) {
                return Err(FatalError::new(
                    "I2-done-not-downloading",
                    "a done piece appears in the downloading list",
                    vec![*pn],
                ));
            }
            if !self.in_progress.contains_key(pn) {
                return Err(FatalError::new(
                    "I2-downloading-in-progress",
                    "a downloading piece has no in_progress entry",
                    vec![*pn],
                ));
            }
        }

        // (3) a downloading (pn, blk) is neither pending nor have in its
        // in_progress entry.
        for (pn, blk) in &self.downloading {
            if let Some(ipp) = self.in_progress.get(pn) {
                if ipp.pending_blocks.contains(blk) || ipp.have_blocks.contains(blk) {
                    return Err(FatalError::new(
                        "I3-downloading-disjoint-from-piece-state",
                        format!("block {:?} of piece {pn} is both checked out and tracked as pending/have", blk),
                        vec![*pn],
                    ));
                }
            }
        }

        // (4) |have_blocks| <= total_blocks for every in_progress entry.
        for (pn, ipp) in &self.in_progress {
            if ipp.have_blocks.len() > ipp.total_blocks {
                return Err(FatalError::new(
                    "I4-have-blocks-bound",
                    format!(
                        "piece {pn} has {} have_blocks but only {} total_blocks",
                        ipp.have_blocks.len(),
                        ipp.total_blocks
                    ),
                    vec![*pn],
                ));
            }
        }

        Ok(())
    }

    /// (5) needs the total piece count, so it's a separate call the
    /// dispatcher makes with the piece map in hand.
    pub fn audit_total_coverage(&self, total_pieces: usize) -> Result<(), FatalError> {
        let covered = self.pending.len() + self.done.len() + self.in_progress.len();
        if covered != total_pieces {
            return Err(FatalError::new(
                "I5-total-coverage",
                format!(
                    "pending ({}) + done ({}) + in_progress ({}) = {covered}, expected {total_pieces}",
                    self.pending.len(),
                    self.done.len(),
                    self.in_progress.len()
                ),
                Vec::new(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece_map::PieceMap;

    fn map(n: usize) -> PieceMap {
        PieceMap::from_parts(&vec![[0u8; 20]; n], 16384, 16384 * n as u64)
    }

    #[test]
    fn create_splits_pending_and_done() {
        let pdb = PieceDb::create(&[false, true, false], &map(3));
        assert_eq!(pdb.pending, HashSet::from([0, 2]));
        assert_eq!(pdb.done, HashSet::from([1]));
        assert!(pdb.in_progress.is_empty());
        assert!(!pdb.endgame);
    }

    #[test]
    fn fresh_pdb_passes_audit() {
        let pdb = PieceDb::create(&[false, true, false], &map(3));
        assert!(pdb.audit().is_ok());
        assert!(pdb.audit_total_coverage(3).is_ok());
    }

    #[test]
    fn catches_downloading_without_in_progress() {
        let mut pdb = PieceDb::create(&[false, true, false], &map(3));
        pdb.downloading.push((0, Block::new(0, 16384)));
        assert!(pdb.audit().is_err());
    }

    #[test]
    fn catches_overlap_between_sets() {
        let mut pdb = PieceDb::create(&[false, true, false], &map(3));
        pdb.pending.insert(1); // 1 is already done
        assert!(pdb.audit().is_err());
    }
}
