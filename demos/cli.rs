//! Minimal runnable demo: a single torrent driven by a simulated peer
//! against an in-memory filesystem, printing each status and choke
//! notification as it arrives. Not part of the library surface.

use bytes::Bytes;
use piece_mgr::{spawn_with_defaults, BitField, GrabResult, InMemoryFilesystem, PieceMap};
use sha1::{Digest, Sha1};

const PIECE_LENGTH: u32 = 32 * 1024;
const NUM_PIECES: usize = 4;

fn make_piece_data(pn: usize) -> Vec<u8> {
    vec![pn as u8; PIECE_LENGTH as usize]
}

fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let piece_data: Vec<Vec<u8>> = (0..NUM_PIECES).map(make_piece_data).collect();
    let hashes: Vec<[u8; 20]> = piece_data.iter().map(|d| sha1(d)).collect();
    let total_length = PIECE_LENGTH as u64 * NUM_PIECES as u64;
    let piece_map = PieceMap::from_parts(&hashes, PIECE_LENGTH, total_length);

    let fs = InMemoryFilesystem::new(piece_map.clone());
    let pieces_done = vec![false; NUM_PIECES];
    let (handle, mut status_rx, mut choke_rx, mut supervisor_rx, driver) =
        spawn_with_defaults(piece_map, &pieces_done, fs);
    let driver_task = tokio::spawn(driver);

    let notifications = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(s) = status_rx.recv() => tracing::info!(?s, "status"),
                Some(c) = choke_rx.recv() => tracing::info!(?c, "choke"),
                Some(f) = supervisor_rx.recv() => {
                    tracing::error!(?f, "fatal report");
                    break;
                }
                else => break,
            }
        }
    });

    let mut eligible = BitField::empty(NUM_PIECES);
    for pn in 0..NUM_PIECES {
        eligible.add(pn).unwrap();
    }

    loop {
        let result = handle
            .grab_blocks(2, eligible.clone())
            .await
            .expect("dispatcher alive");
        let grabbed = match result {
            GrabResult::Leech(b) | GrabResult::Endgame(b) => b,
        };
        if grabbed.is_empty() {
            break;
        }
        for (pn, blk) in grabbed {
            let data = &piece_data[pn][blk.offset as usize..(blk.offset + blk.size) as usize];
            handle
                .store_block(pn, blk, Bytes::copy_from_slice(data))
                .await
                .expect("dispatcher alive");
        }

        let done = handle.get_done().await.expect("dispatcher alive");
        if done.len() == NUM_PIECES {
            break;
        }
    }

    drop(handle);
    let _ = driver_task.await;
    let _ = notifications.await;
}
