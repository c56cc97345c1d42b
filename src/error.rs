//! Error categories per the component's failure model: peer-attributable
//! faults are recoverable and handled inline; everything else that would
//! mean a broken invariant is fatal and stops the component.

use std::fmt;

use crate::{block::Block, piece_map::PieceNum};

/// Peer-attributable, recoverable. Logged and otherwise ignored; never
/// propagated out of the dispatcher.
#[derive(Debug, Clone)]
pub enum PeerFault {
    DuplicateStoreBlock { pn: PieceNum, blk: Block },
    StrayEndgamePutback { pn: PieceNum },
    DigestMismatch { pn: PieceNum, expected: [u8; 20] },
    StoreForUnopenedPiece { pn: PieceNum, blk: Block },
}

impl fmt::Display for PeerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerFault::DuplicateStoreBlock { pn, blk } => {
                write!(f, "duplicate store of piece {pn} block {}..{}", blk.offset, blk.offset + blk.size)
            }
            PeerFault::StrayEndgamePutback { pn } => {
                write!(f, "put-back for already-done piece {pn}, dropping")
            }
            PeerFault::DigestMismatch { pn, expected } => {
                write!(
                    f,
                    "piece {pn} failed digest verification (expected {}), re-queueing",
                    hex::encode(expected)
                )
            }
            PeerFault::StoreForUnopenedPiece { pn, blk } => {
                write!(
                    f,
                    "store of piece {pn} block {}..{} for a piece that isn't open or done, dropping",
                    blk.offset, blk.offset + blk.size
                )
            }
        }
    }
}

/// A programmer-invariant violation: an audit failure, a missing
/// `in_progress` entry when one must exist, an out-of-range `PieceNum`, or
/// a filesystem collaborator that doesn't know a piece it must know.
#[derive(Debug, Clone)]
pub struct FatalError {
    pub invariant: &'static str,
    pub detail: String,
    pub pieces: Vec<PieceNum>,
}

impl FatalError {
    pub fn new(invariant: &'static str, detail: impl Into<String>, pieces: Vec<PieceNum>) -> Self {
        Self {
            invariant,
            detail: detail.into(),
            pieces,
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invariant `{}` violated: {} (pieces: {:?})",
            self.invariant, self.detail, self.pieces
        )
    }
}

impl std::error::Error for FatalError {}

/// Sent once, at most, on the supervisor channel before the dispatcher
/// loop returns.
#[derive(Debug, Clone)]
pub struct FatalReport {
    pub component: &'static str,
    pub cause: FatalError,
}
