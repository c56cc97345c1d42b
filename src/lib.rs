//! Piece database, grab engine and completion pipeline for a BitTorrent
//! client: the subsystem that decides which blocks a peer should fetch
//! next and what happens to the bytes it sends back. Tracker and peer
//! wire protocol, metainfo parsing, multi-file layout and bandwidth
//! accounting live elsewhere; this crate only owns piece/block state.

pub mod bitfield;
pub mod block;
pub mod config;
pub mod error;
pub mod fs;
pub mod grab;
pub mod manager;
pub mod messages;
pub mod pdb;
pub mod piece_map;
pub mod rng;
pub mod util;

pub use bitfield::BitField;
pub use block::{block_piece, Block};
pub use config::Config;
pub use error::{FatalError, FatalReport, PeerFault};
pub use fs::{InMemoryFilesystem, PieceFilesystem};
pub use grab::GrabResult;
pub use manager::{spawn_with_defaults, PieceManager, PieceMgrHandle};
pub use messages::{ChokeNotification, PieceMgrMsg, StatusNotification};
pub use piece_map::{PieceInfo, PieceMap, PieceNum};
pub use rng::{PieceRng, StdPieceRng, ThreadPieceRng};
