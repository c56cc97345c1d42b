use bytes::Bytes;

/// Length of piece `piece_i` out of `total_pieces`, where all pieces share
/// `piece_length` except possibly the last, which may be shorter.
pub fn piece_length_at(
    piece_i: usize,
    total_pieces: usize,
    piece_length: u32,
    total_length: u64,
) -> u32 {
    if piece_i + 1 == total_pieces {
        let remainder = (total_length % piece_length as u64) as u32;
        if remainder == 0 {
            piece_length
        } else {
            remainder
        }
    } else {
        piece_length
    }
}

pub fn verify_sha1(expected: &[u8; 20], data: &Bytes) -> bool {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    let result: [u8; 20] = hasher.finalize().into();
    &result == expected
}
