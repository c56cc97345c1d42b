//! The single-threaded event dispatcher: the only mutator of the piece
//! database. Owns the PDB exclusively, so there is no locking anywhere in
//! this crate: one task, one `tokio::select!` loop, channels for
//! everything that crosses a task boundary.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::{
    bitfield::BitField,
    block::Block,
    config::Config,
    error::{FatalError, FatalReport, PeerFault},
    fs::PieceFilesystem,
    grab::{grab_blocks, GrabResult},
    messages::{ChokeNotification, PieceMgrMsg, StatusNotification},
    pdb::{InProgressPiece, PieceDb},
    piece_map::{PieceMap, PieceNum},
    rng::PieceRng,
};

/// A thin, cloneable front for the dispatcher. Every call is a single
/// synchronous rendezvous: send the request, await the reply.
#[derive(Debug, Clone)]
pub struct PieceMgrHandle {
    tx: mpsc::Sender<PieceMgrMsg>,
}

impl PieceMgrHandle {
    pub async fn grab_blocks(&self, k: usize, eligible: BitField) -> anyhow::Result<GrabResult> {
        self.call(|reply| PieceMgrMsg::GrabBlocks { k, eligible, reply })
            .await
    }

    pub async fn store_block(&self, pn: PieceNum, blk: Block, bytes: Bytes) -> anyhow::Result<()> {
        self.call(|reply| PieceMgrMsg::StoreBlock {
            pn,
            blk,
            bytes,
            reply,
        })
        .await
    }

    pub async fn putback_blocks(&self, blocks: Vec<(PieceNum, Block)>) -> anyhow::Result<()> {
        self.call(|reply| PieceMgrMsg::PutbackBlocks { blocks, reply })
            .await
    }

    pub async fn ask_interested(&self, set: BitField) -> anyhow::Result<bool> {
        self.call(|reply| PieceMgrMsg::AskInterested { set, reply })
            .await
    }

    pub async fn get_done(&self) -> anyhow::Result<Vec<PieceNum>> {
        self.call(|reply| PieceMgrMsg::GetDone { reply }).await
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PieceMgrMsg,
    ) -> anyhow::Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("piece manager dispatcher is gone"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("piece manager dropped the reply channel"))
    }
}

pub struct PieceManager<F: PieceFilesystem> {
    pdb: PieceDb,
    piece_map: PieceMap,
    fs: F,
    rng: Box<dyn PieceRng>,
    config: Config,
    status_tx: mpsc::Sender<StatusNotification>,
    choke_tx: mpsc::Sender<ChokeNotification>,
    supervisor_tx: mpsc::Sender<FatalReport>,
}

impl<F: PieceFilesystem> PieceManager<F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        piece_map: PieceMap,
        pieces_done: &[bool],
        fs: F,
        rng: Box<dyn PieceRng>,
        status_tx: mpsc::Sender<StatusNotification>,
        choke_tx: mpsc::Sender<ChokeNotification>,
        supervisor_tx: mpsc::Sender<FatalReport>,
        config: Config,
    ) -> Self {
        let pdb = PieceDb::create(pieces_done, &piece_map);
        Self {
            pdb,
            piece_map,
            fs,
            rng,
            config,
            status_tx,
            choke_tx,
            supervisor_tx,
        }
    }

    /// Spawns the dispatcher as its own task and returns a handle peer
    /// workers can clone freely.
    pub fn spawn(self) -> (PieceMgrHandle, tokio::task::JoinHandle<()>)
    where
        F: 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.rpc_channel_capacity);
        let join = tokio::spawn(self.run(rx));
        (PieceMgrHandle { tx }, join)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PieceMgrMsg>) {
        loop {
            if let Err(cause) = self.audit_if_due() {
                self.report_fatal(cause).await;
                return;
            }

            let pending_notification = self.pdb.done_push_queue.front().copied();
            let outcome = match pending_notification {
                Some(notification) => {
                    tokio::select! {
                        msg = rx.recv() => Outcome::Received(msg),
                        send_result = self.choke_tx.send(notification) => Outcome::Sent(send_result.is_ok()),
                    }
                }
                None => Outcome::Received(rx.recv().await),
            };

            match outcome {
                Outcome::Sent(true) => {
                    self.pdb.done_push_queue.pop_front();
                }
                Outcome::Sent(false) => {
                    self.report_fatal(FatalError::new(
                        "choke-channel-closed",
                        "choke collaborator channel closed while a notification was pending",
                        Vec::new(),
                    ))
                    .await;
                    return;
                }
                Outcome::Received(Some(msg)) => {
                    if let Err(cause) = self.dispatch(msg).await {
                        self.report_fatal(cause).await;
                        return;
                    }
                }
                Outcome::Received(None) => return,
            }
        }
    }

    fn audit_if_due(&mut self) -> Result<(), FatalError> {
        if self.pdb.assert_countdown == 0 {
            self.pdb.audit()?;
            self.pdb.audit_total_coverage(self.piece_map.len())?;
            self.pdb.assert_countdown = self.config.assert_interval;
        } else {
            self.pdb.assert_countdown -= 1;
        }
        Ok(())
    }

    async fn report_fatal(&self, cause: FatalError) {
        tracing::error!(%cause, "piece manager stopping on a fatal invariant violation");
        let _ = self
            .supervisor_tx
            .send(FatalReport {
                component: "piece_manager",
                cause,
            })
            .await;
    }

    async fn dispatch(&mut self, msg: PieceMgrMsg) -> Result<(), FatalError> {
        match msg {
            PieceMgrMsg::GrabBlocks {
                k,
                eligible,
                reply,
            } => {
                let result = grab_blocks(
                    &mut self.pdb,
                    &self.piece_map,
                    self.rng.as_mut(),
                    self.config.block_size,
                    k,
                    &eligible,
                );
                let _ = reply.send(result);
                Ok(())
            }
            PieceMgrMsg::StoreBlock {
                pn,
                blk,
                bytes,
                reply,
            } => {
                let result = self.handle_store_block(pn, blk, bytes).await;
                let _ = reply.send(());
                result
            }
            PieceMgrMsg::PutbackBlocks { blocks, reply } => {
                let result = self.handle_putback_blocks(blocks);
                let _ = reply.send(());
                result
            }
            PieceMgrMsg::AskInterested { set, reply } => {
                let _ = reply.send(self.ask_interested(&set));
                Ok(())
            }
            PieceMgrMsg::GetDone { reply } => {
                let mut done: Vec<PieceNum> = self.pdb.done.iter().copied().collect();
                done.sort_unstable();
                let _ = reply.send(done);
                Ok(())
            }
        }
    }

    fn ask_interested(&self, set: &BitField) -> bool {
        self.pdb.pending.iter().any(|pn| set.has(*pn))
            || self.pdb.in_progress.keys().any(|pn| set.has(*pn))
    }

    async fn handle_store_block(
        &mut self,
        pn: PieceNum,
        blk: Block,
        bytes: Bytes,
    ) -> Result<(), FatalError> {
        // Step 1: blocking write to the filesystem collaborator.
        self.fs
            .write_block(pn, blk, bytes)
            .await
            .map_err(|e| FatalError::new("fs-write-block", e.to_string(), vec![pn]))?;

        // Step 2: remove (pn, blk) from downloading. Absence is a no-op:
        // the block may never have been grabbed, or may already have been
        // put back, and we still trust the bytes either way.
        if let Some(idx) = self
            .pdb
            .downloading
            .iter()
            .position(|&(p, b)| p == pn && b == blk)
        {
            self.pdb.downloading.remove(idx);
        }

        // Step 3: duplicate-at-other-peer cancellation signal in endgame.
        if self.pdb.endgame {
            self.pdb
                .done_push_queue
                .push_back(ChokeNotification::BlockComplete(pn, blk));
        }

        // Step 4: update progress. A piece that is neither `in_progress`
        // nor `done` here is still a piece the filesystem collaborator
        // just accepted a write for in step 1 (an out-of-range `pn` would
        // have failed there), so it's sitting in `pending`, most likely
        // reopened by a digest mismatch (finish_piece's `Ok(Some(false))`
        // arm) after this store's block was already grabbed. That's a
        // stray, peer-attributable store, not a broken invariant: drop it.
        let is_done = self.pdb.done.contains(&pn);
        let Some(ipp) = self.pdb.in_progress.get_mut(&pn) else {
            if is_done {
                tracing::warn!(%pn, "{}", PeerFault::DuplicateStoreBlock { pn, blk });
            } else {
                tracing::warn!(%pn, "{}", PeerFault::StoreForUnopenedPiece { pn, blk });
            }
            return Ok(());
        };

        if ipp.have_blocks.contains(&blk) {
            tracing::warn!(%pn, "{}", PeerFault::DuplicateStoreBlock { pn, blk });
            return Ok(());
        }
        ipp.have_blocks.insert(blk);
        let tentatively_complete = ipp.is_complete();

        if !tentatively_complete {
            return Ok(());
        }

        let length = self
            .piece_map
            .get(pn)
            .ok_or_else(|| FatalError::new("E-piece-map-range", format!("piece {pn} out of range"), vec![pn]))?
            .length;

        self.verify_tentative_completion(pn, length)?;
        self.finish_piece(pn, length).await
    }

    fn verify_tentative_completion(&self, pn: PieceNum, length: u32) -> Result<(), FatalError> {
        if self.pdb.downloading.iter().any(|(p, _)| *p == pn) {
            return Err(FatalError::new(
                "E5-block-still-checked-out",
                format!("piece {pn} reports complete but still has a block checked out"),
                vec![pn],
            ));
        }
        let ipp = self
            .pdb
            .in_progress
            .get(&pn)
            .expect("caller just confirmed this piece is in_progress");
        let mut blocks: Vec<Block> = ipp.have_blocks.iter().copied().collect();
        blocks.sort_by_key(|b| b.offset);
        let mut cursor = 0u32;
        for b in &blocks {
            if b.offset != cursor {
                return Err(FatalError::new(
                    "E5-noncontiguous-piece",
                    format!("piece {pn}'s blocks don't cover [0, {length}) contiguously"),
                    vec![pn],
                ));
            }
            cursor += b.size;
        }
        if cursor != length {
            return Err(FatalError::new(
                "E5-piece-coverage-mismatch",
                format!("piece {pn} covers {cursor} bytes, expected {length}"),
                vec![pn],
            ));
        }
        Ok(())
    }

    async fn finish_piece(&mut self, pn: PieceNum, length: u32) -> Result<(), FatalError> {
        match self.fs.check_piece(pn).await {
            Ok(Some(true)) => {
                self.pdb.in_progress.remove(&pn);
                self.pdb.done.insert(pn);
                self.pdb
                    .done_push_queue
                    .push_back(ChokeNotification::PieceDone(pn));
                let _ = self
                    .status_tx
                    .send(StatusNotification::CompletedPiece { length })
                    .await;
                if self.pdb.is_torrent_complete(self.piece_map.len()) {
                    tracing::info!("torrent complete");
                    self.pdb
                        .done_push_queue
                        .push_back(ChokeNotification::TorrentComplete);
                    let _ = self.status_tx.send(StatusNotification::TorrentCompleted).await;
                }
                Ok(())
            }
            Ok(Some(false)) => {
                let expected = self
                    .piece_map
                    .get(pn)
                    .map(|info| info.expected_digest)
                    .unwrap_or_default();
                tracing::warn!(%pn, "{}", PeerFault::DigestMismatch { pn, expected });
                self.pdb.in_progress.remove(&pn);
                self.pdb.pending.insert(pn);
                Ok(())
            }
            Ok(None) => Err(FatalError::new(
                "E-fs-unknown-piece",
                format!("filesystem collaborator doesn't know piece {pn}"),
                vec![pn],
            )),
            Err(e) => Err(FatalError::new(
                "E-fs-check-piece-failed",
                e.to_string(),
                vec![pn],
            )),
        }
    }

    fn handle_putback_blocks(&mut self, blocks: Vec<(PieceNum, Block)>) -> Result<(), FatalError> {
        for (pn, blk) in blocks {
            if self.pdb.done.contains(&pn) {
                tracing::warn!(%pn, "{}", PeerFault::StrayEndgamePutback { pn });
                continue;
            }
            if let Some(idx) = self
                .pdb
                .downloading
                .iter()
                .position(|&(p, b)| p == pn && b == blk)
            {
                self.pdb.downloading.remove(idx);
            }
            let ipp: &mut InProgressPiece = self.pdb.in_progress.get_mut(&pn).ok_or_else(|| {
                FatalError::new(
                    "E-putback-missing-in-progress",
                    format!("put-back for piece {pn}, which is not in_progress and not done"),
                    vec![pn],
                )
            })?;
            ipp.pending_blocks.push_front(blk);
        }
        Ok(())
    }
}

enum Outcome {
    Sent(bool),
    Received(Option<PieceMgrMsg>),
}


/// Helper used by the demo binary and doctests to spawn a manager without
/// spelling out every channel by hand.
pub fn spawn_with_defaults<F: PieceFilesystem + 'static>(
    piece_map: PieceMap,
    pieces_done: &[bool],
    fs: F,
) -> (
    PieceMgrHandle,
    mpsc::Receiver<StatusNotification>,
    mpsc::Receiver<ChokeNotification>,
    mpsc::Receiver<FatalReport>,
    impl Future<Output = ()>,
) {
    let config = Config::default();
    let (status_tx, status_rx) = mpsc::channel(config.choke_channel_capacity);
    let (choke_tx, choke_rx) = mpsc::channel(config.choke_channel_capacity);
    let (supervisor_tx, supervisor_rx) = mpsc::channel(1);
    let manager = PieceManager::new(
        piece_map,
        pieces_done,
        fs,
        Box::new(crate::rng::ThreadPieceRng),
        status_tx,
        choke_tx,
        supervisor_tx,
        config,
    );
    let (handle, join) = manager.spawn();
    let driver = async move {
        let _ = join.await;
    };
    (handle, status_rx, choke_rx, supervisor_rx, driver)
}
