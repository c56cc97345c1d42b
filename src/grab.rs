//! Hands out work to peers: drains in-progress pieces first, opens new
//! pending pieces at random, and falls back to endgame once nothing is
//! left to open.

use crate::{
    bitfield::BitField,
    block::{block_piece, Block},
    pdb::{InProgressPiece, PieceDb},
    piece_map::{PieceMap, PieceNum},
    rng::{self, PieceRng},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabResult {
    Leech(Vec<(PieceNum, Block)>),
    Endgame(Vec<(PieceNum, Block)>),
}

/// `grab_blocks(k, eligible_set)`. `pdb` is mutated in place: blocks handed
/// out in leech mode move from a piece's `pending_blocks` into
/// `downloading`; a newly-opened piece moves from `pending` to
/// `in_progress`.
pub fn grab_blocks(
    pdb: &mut PieceDb,
    piece_map: &PieceMap,
    rng: &mut dyn PieceRng,
    block_size: u32,
    k: usize,
    eligible: &BitField,
) -> GrabResult {
    let mut grabbed: Vec<(PieceNum, Block)> = Vec::new();
    let mut remaining = k;

    // Step 1: drain in-progress pieces the peer can help with.
    let in_progress_candidates: Vec<PieceNum> = pdb
        .in_progress
        .keys()
        .copied()
        .filter(|pn| eligible.has(*pn))
        .collect();
    for pn in in_progress_candidates {
        if remaining == 0 {
            break;
        }
        let ipp = pdb.in_progress.get_mut(&pn).expect("just collected key");
        drain_into(ipp, pn, &mut grabbed, &mut remaining);
    }

    // Step 2: open new pending pieces at random, draining each as it's
    // opened (equivalent to looping back to step 1, since no other
    // in-progress piece gains blocks between opens).
    while remaining > 0 {
        let pending_candidates: Vec<PieceNum> = pdb
            .pending
            .iter()
            .copied()
            .filter(|pn| eligible.has(*pn))
            .collect();
        if pending_candidates.is_empty() {
            break;
        }
        let idx = rng.gen_range(pending_candidates.len());
        let pn = pending_candidates[idx];
        pdb.pending.remove(&pn);

        let info = piece_map
            .get(pn)
            .expect("pending piece numbers always come from the piece map");
        let blocks = block_piece(block_size, info.length);
        let mut ipp = InProgressPiece::new(blocks);
        drain_into(&mut ipp, pn, &mut grabbed, &mut remaining);
        pdb.in_progress.insert(pn, ipp);
    }

    // Step 3: endgame fallback.
    if grabbed.is_empty() && pdb.pending.is_empty() {
        pdb.endgame = true;
        let mut candidates: Vec<(PieceNum, Block)> = pdb
            .downloading
            .iter()
            .copied()
            .filter(|(pn, _)| eligible.has(*pn))
            .collect();
        rng::shuffle(rng, &mut candidates);
        candidates.truncate(k);
        return GrabResult::Endgame(candidates);
    }

    pdb.downloading.extend(grabbed.iter().copied());
    GrabResult::Leech(grabbed)
}

fn drain_into(
    ipp: &mut InProgressPiece,
    pn: PieceNum,
    grabbed: &mut Vec<(PieceNum, Block)>,
    remaining: &mut usize,
) {
    while *remaining > 0 {
        let Some(blk) = ipp.pending_blocks.pop_front() else {
            break;
        };
        grabbed.push((pn, blk));
        *remaining -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pdb::PieceDb, piece_map::PieceMap, rng::StdPieceRng};

    fn setup(n: usize, piece_size: u32) -> (PieceDb, PieceMap) {
        let hashes = vec![[0u8; 20]; n];
        let map = PieceMap::from_parts(&hashes, piece_size, piece_size as u64 * n as u64);
        let pdb = PieceDb::create(&vec![false; n], &map);
        (pdb, map)
    }

    fn eligible(pieces: &[usize], total: usize) -> BitField {
        let mut bf = BitField::empty(total);
        for p in pieces {
            bf.add(*p).unwrap();
        }
        bf
    }

    #[test]
    fn grabs_all_blocks_across_two_pieces() {
        let (mut pdb, map) = setup(2, 32 * 1024);
        let mut rng = StdPieceRng::from_seed(1);
        let result = grab_blocks(&mut pdb, &map, &mut rng, 16384, 4, &eligible(&[0, 1], 2));
        let GrabResult::Leech(blocks) = result else {
            panic!("expected leech result");
        };
        assert_eq!(blocks.len(), 4);
        assert_eq!(pdb.downloading.len(), 4);
        assert!(pdb.pending.is_empty());
        assert_eq!(pdb.in_progress.len(), 2);
    }

    #[test]
    fn endgame_entry_on_single_block_piece() {
        let (mut pdb, map) = setup(1, 16384);
        let mut rng = StdPieceRng::from_seed(2);
        let first = grab_blocks(&mut pdb, &map, &mut rng, 16384, 1, &eligible(&[0], 1));
        assert_eq!(first, GrabResult::Leech(vec![(0, Block::new(0, 16384))]));
        assert!(!pdb.endgame);

        let second = grab_blocks(&mut pdb, &map, &mut rng, 16384, 1, &eligible(&[0], 1));
        assert_eq!(
            second,
            GrabResult::Endgame(vec![(0, Block::new(0, 16384))])
        );
        assert!(pdb.endgame);
    }

    #[test]
    fn empty_leech_when_peer_has_nothing_we_want() {
        let (mut pdb, map) = setup(2, 16384);
        pdb.pending.remove(&0);
        pdb.pending.remove(&1);
        pdb.done.insert(0);
        pdb.done.insert(1);
        let mut rng = StdPieceRng::from_seed(3);
        let result = grab_blocks(&mut pdb, &map, &mut rng, 16384, 4, &eligible(&[0, 1], 2));
        // pending is empty but so is downloading, so nothing to shuffle into
        // endgame either: the peer is simply not interesting right now.
        assert_eq!(result, GrabResult::Endgame(vec![]));
    }

    #[test]
    fn downloading_never_has_duplicate_checkouts_outside_endgame() {
        let (mut pdb, map) = setup(4, 16384);
        let mut rng = StdPieceRng::from_seed(4);
        let _ = grab_blocks(&mut pdb, &map, &mut rng, 16384, 4, &eligible(&[0, 1, 2, 3], 4));
        let mut seen = std::collections::HashSet::new();
        for entry in &pdb.downloading {
            assert!(seen.insert(*entry), "duplicate checkout outside endgame");
        }
    }
}
