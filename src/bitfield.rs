//! Compact piece-presence set, used both for our own `done` snapshot (for
//! handshakes) and for a peer's advertised `eligible_set`.

use anyhow::Context;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField(pub Vec<u8>);

impl BitField {
    pub fn new(data: &[u8]) -> Self {
        Self(data.to_vec())
    }

    pub fn empty(pieces_amount: usize) -> Self {
        Self(vec![0; std::cmp::max(pieces_amount.div_ceil(8), 1)])
    }

    pub fn has(&self, piece: usize) -> bool {
        let Some(byte) = self.0.get(piece / 8) else {
            return false;
        };
        let position = (piece % 8) as u32;
        byte & 1u8.rotate_right(position + 1) != 0
    }

    pub fn add(&mut self, piece: usize) -> anyhow::Result<()> {
        let position = (piece % 8) as u32;
        let byte = self
            .0
            .get_mut(piece / 8)
            .context("piece index out of bitfield range")?;
        *byte |= 1u8.rotate_right(position + 1);
        Ok(())
    }

    pub fn pieces(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(i, byte)| {
            (0..8).filter_map(move |position| {
                let piece_i = i * 8 + position as usize;
                let mask = 1u8.rotate_right(position + 1);
                (byte & mask != 0).then_some(piece_i)
            })
        })
    }

    /// `true` iff `self` and `other` have at least one piece in common.
    pub fn intersects(&self, other: &BitField) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .any(|(a, b)| a & b != 0)
    }
}

impl From<Vec<u8>> for BitField {
    fn from(value: Vec<u8>) -> Self {
        BitField(value)
    }
}

#[cfg(test)]
mod tests {
    use super::BitField;

    #[test]
    fn bitfield_has() {
        let data = [0b01110101, 0b01110001];
        let bitfield = BitField::new(&data);
        assert!(!bitfield.has(0));
        assert!(bitfield.has(1));
        assert!(bitfield.has(2));
        assert!(!bitfield.has(4));
        assert!(bitfield.has(9));
        assert!(!bitfield.has(16));
    }

    #[test]
    fn bitfield_add() {
        let mut bitfield = BitField::empty(10);
        bitfield.add(0).unwrap();
        bitfield.add(9).unwrap();
        assert!(bitfield.has(0));
        assert!(bitfield.has(9));
        assert!(!bitfield.has(1));
        assert!(bitfield.add(16).is_err());
    }

    #[test]
    fn bitfield_iterator() {
        let data = [0b01110101, 0b01110001];
        let bitfield = BitField::new(&data);
        let collected: Vec<_> = bitfield.pieces().collect();
        assert_eq!(collected, vec![1, 2, 3, 5, 7, 9, 10, 11, 15]);
    }

    #[test]
    fn bitfield_intersects() {
        let a = BitField::new(&[0b1000_0000]);
        let b = BitField::new(&[0b0100_0000]);
        let c = BitField::new(&[0b1100_0000]);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(b.intersects(&c));
    }
}
