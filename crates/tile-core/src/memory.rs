//! Masked load/store: the only way a kernel body touches a buffer.

use crate::addressing::Offsets;
use crate::block::Block;
use crate::mask::Mask;
use crate::types::Element;
use crate::{Result, TileError};

fn check_shapes(offsets: &Offsets, mask: &Mask) -> Result<()> {
    if offsets.shape() != mask.shape() {
        let (or, oc) = offsets.shape();
        let (mr, mc) = mask.shape();
        return Err(TileError::ShapeMismatch {
            expected: vec![or, oc],
            got: vec![mr, mc],
        });
    }
    Ok(())
}

/// Gather `buffer[offsets]` where `mask` holds, `fill` elsewhere.
///
/// Masked-off offsets are never dereferenced, so they may point past the end
/// of the buffer.
pub fn load<T: Element>(buffer: &[T], offsets: &Offsets, mask: &Mask, fill: f32) -> Result<Block> {
    check_shapes(offsets, mask)?;
    let (rows, cols) = offsets.shape();
    let data = offsets
        .as_slice()
        .iter()
        .zip(mask.as_slice())
        .map(|(&off, &live)| if live { buffer[off].to_f32() } else { fill })
        .collect();
    Block::from_vec(rows, cols, data)
}

/// Per-cell staging area for output writes.
///
/// A cell's stores are recorded here and committed to the output buffer by
/// the launcher once every cell of the launch has succeeded.
#[derive(Debug)]
pub struct CellWriter<T> {
    writes: Vec<(usize, T)>,
}

impl<T: Element> CellWriter<T> {
    pub(crate) fn new() -> Self {
        Self { writes: Vec::new() }
    }

    /// Write `values` at `offsets` for every lane where `mask` holds.
    pub fn store(&mut self, offsets: &Offsets, values: &Block, mask: &Mask) -> Result<()> {
        check_shapes(offsets, mask)?;
        if values.shape() != mask.shape() {
            let (vr, vc) = values.shape();
            let (mr, mc) = mask.shape();
            return Err(TileError::ShapeMismatch {
                expected: vec![mr, mc],
                got: vec![vr, vc],
            });
        }
        self.writes.reserve(mask.count());
        for ((&off, &v), &live) in offsets
            .as_slice()
            .iter()
            .zip(values.as_slice())
            .zip(mask.as_slice())
        {
            if live {
                self.writes.push((off, T::from_f32(v)));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub(crate) fn staged(&self) -> &[(usize, T)] {
        &self.writes
    }

    pub(crate) fn into_writes(self) -> Vec<(usize, T)> {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::BlockRange;

    #[test]
    fn test_load_fills_tail() {
        let buf = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let r = BlockRange::new(1, 4, buf.len());
        let x = load(&buf, &Offsets::row(r.indices()), &r.mask(), f32::NEG_INFINITY).unwrap();
        assert_eq!(
            x.as_slice(),
            &[5.0, 6.0, f32::NEG_INFINITY, f32::NEG_INFINITY]
        );
    }

    #[test]
    fn test_store_skips_masked_lanes() {
        let r = BlockRange::new(0, 4, 3);
        let mut w = CellWriter::<f32>::new();
        w.store(
            &Offsets::row(r.indices()),
            &Block::row(vec![1.0, 2.0, 3.0, 4.0]),
            &r.mask(),
        )
        .unwrap();
        assert_eq!(w.into_writes(), vec![(0, 1.0), (1, 2.0), (2, 3.0)]);
    }

    #[test]
    fn test_shape_disagreement_rejected() {
        let buf = [0.0f32; 8];
        let offsets = Offsets::row(vec![0, 1, 2, 3]);
        let mask = Mask::row(vec![true; 2]);
        assert!(load(&buf, &offsets, &mask, 0.0).is_err());

        let mut w = CellWriter::<f32>::new();
        let err = w.store(&offsets, &Block::zeros(1, 2), &Mask::row(vec![true; 4]));
        assert!(matches!(err, Err(TileError::ShapeMismatch { .. })));
    }
}
