//! The RPC surface peer workers use (inbound), and the notifications the
//! dispatcher pushes out to the status and choke collaborators.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{bitfield::BitField, block::Block, grab::GrabResult, piece_map::PieceNum};

/// Inbound messages from peer workers. Every variant carries a reply
/// channel; the dispatcher always answers before moving to the next
/// message (there is exactly one suspension point per message: the work
/// itself, which may in turn await the filesystem collaborator).
#[derive(Debug)]
pub enum PieceMgrMsg {
    GrabBlocks {
        k: usize,
        eligible: BitField,
        reply: oneshot::Sender<GrabResult>,
    },
    StoreBlock {
        pn: PieceNum,
        blk: Block,
        bytes: Bytes,
        reply: oneshot::Sender<()>,
    },
    PutbackBlocks {
        blocks: Vec<(PieceNum, Block)>,
        reply: oneshot::Sender<()>,
    },
    AskInterested {
        set: BitField,
        reply: oneshot::Sender<bool>,
    },
    GetDone {
        reply: oneshot::Sender<Vec<PieceNum>>,
    },
}

/// Outbound to the choke subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChokeNotification {
    PieceDone(PieceNum),
    BlockComplete(PieceNum, Block),
    TorrentComplete,
}

/// Outbound to the status subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusNotification {
    CompletedPiece { length: u32 },
    TorrentCompleted,
}
