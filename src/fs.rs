//! The filesystem collaborator boundary: `WriteBlock` and `CheckPiece` as
//! seen from the Piece Manager. Disk layout, multi-file splitting and
//! actual I/O are out of scope here: this is a seam, not an adapter.

use bytes::Bytes;

use crate::piece_map::PieceNum;

/// What the Piece Manager needs from the filesystem collaborator. A real
/// implementation owns the backing file handle(s); this crate only awaits
/// these two calls.
pub trait PieceFilesystem: Send + Sync + 'static {
    /// Persist `bytes` for `(pn, blk)`. `bytes.len() == blk.size` is a
    /// precondition the caller upholds.
    fn write_block(
        &self,
        pn: PieceNum,
        blk: crate::block::Block,
        bytes: Bytes,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    /// `Ok(Some(true))` if the piece's digest matches, `Ok(Some(false))` on
    /// mismatch, `Ok(None)` if the filesystem doesn't track this piece
    /// (itself a fatal condition one level up), `Err` on a collaborator
    /// failure.
    fn check_piece(
        &self,
        pn: PieceNum,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<bool>>> + Send;
}

/// In-memory test double. Holds whole-piece buffers, indexed by `PieceNum`,
/// and verifies against the expected digests it was constructed with.
#[derive(Debug, Clone)]
pub struct InMemoryFilesystem {
    inner: std::sync::Arc<tokio::sync::Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    piece_map: crate::piece_map::PieceMap,
    buffers: std::collections::HashMap<PieceNum, bytes::BytesMut>,
    /// Pieces whose next `check_piece` should report a mismatch regardless
    /// of bytes written, used by tests to simulate corruption cheaply.
    force_mismatch: std::collections::HashSet<PieceNum>,
}

impl InMemoryFilesystem {
    pub fn new(piece_map: crate::piece_map::PieceMap) -> Self {
        Self {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(Inner {
                piece_map,
                buffers: std::collections::HashMap::new(),
                force_mismatch: std::collections::HashSet::new(),
            })),
        }
    }

    /// Test hook: make the next `check_piece(pn)` report a digest mismatch.
    pub async fn force_mismatch_once(&self, pn: PieceNum) {
        self.inner.lock().await.force_mismatch.insert(pn);
    }

    pub async fn stored_piece(&self, pn: PieceNum) -> Option<Bytes> {
        self.inner
            .lock()
            .await
            .buffers
            .get(&pn)
            .map(|b| b.clone().freeze())
    }
}

impl PieceFilesystem for InMemoryFilesystem {
    async fn write_block(
        &self,
        pn: PieceNum,
        blk: crate::block::Block,
        bytes: Bytes,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            bytes.len() as u32 == blk.size,
            "write_block payload length mismatch for piece {pn}"
        );
        let mut inner = self.inner.lock().await;
        let length = inner
            .piece_map
            .get(pn)
            .ok_or_else(|| anyhow::anyhow!("piece {pn} unknown to filesystem"))?
            .length;
        let buf = inner
            .buffers
            .entry(pn)
            .or_insert_with(|| bytes::BytesMut::zeroed(length as usize));
        let start = blk.offset as usize;
        buf[start..start + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    async fn check_piece(&self, pn: PieceNum) -> anyhow::Result<Option<bool>> {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.piece_map.get(pn).cloned() else {
            return Ok(None);
        };
        let Some(buf) = inner.buffers.get(&pn) else {
            return Ok(None);
        };
        let forced_mismatch = inner.force_mismatch.remove(&pn);
        let bytes = buf.clone().freeze();
        let matches = !forced_mismatch && crate::util::verify_sha1(&info.expected_digest, &bytes);
        Ok(Some(matches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    fn sha1(data: &[u8]) -> [u8; 20] {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[tokio::test]
    async fn write_then_check_succeeds() {
        let data = b"0123456789abcdef".to_vec();
        let map = crate::piece_map::PieceMap::from_parts(&[sha1(&data)], 16, 16);
        let fs = InMemoryFilesystem::new(map);
        fs.write_block(0, Block::new(0, 16), Bytes::from(data))
            .await
            .unwrap();
        assert_eq!(fs.check_piece(0).await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn forced_mismatch_reports_false_once() {
        let data = b"0123456789abcdef".to_vec();
        let map = crate::piece_map::PieceMap::from_parts(&[sha1(&data)], 16, 16);
        let fs = InMemoryFilesystem::new(map);
        fs.write_block(0, Block::new(0, 16), Bytes::from(data))
            .await
            .unwrap();
        fs.force_mismatch_once(0).await;
        assert_eq!(fs.check_piece(0).await.unwrap(), Some(false));
        assert_eq!(fs.check_piece(0).await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn unknown_piece_is_none() {
        let map = crate::piece_map::PieceMap::from_parts(&[[0u8; 20]], 16, 16);
        let fs = InMemoryFilesystem::new(map);
        assert_eq!(fs.check_piece(5).await.unwrap(), None);
    }
}
