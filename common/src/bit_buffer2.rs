//! Bit-packed 2D buffer for boolean masks.
//!
//! Each row starts on a fresh `u64` word, so rows can be scanned word by word
//! and written in parallel without sharing words. Bits past `width` in the last
//! word of a row are always zero.

use rayon::prelude::*;
use std::ops::Index;

/// Number of bits per storage word.
pub const BITS_PER_WORD: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer2 {
    /// Packed bit storage, `words_per_row` words per row, LSB first.
    words: Vec<u64>,
    width: usize,
    height: usize,
    words_per_row: usize,
}

impl BitBuffer2 {
    /// Create a new bit buffer filled with the given value.
    pub fn new_filled(width: usize, height: usize, value: bool) -> Self {
        let words_per_row = width.div_ceil(BITS_PER_WORD);
        let mut buffer = Self {
            words: vec![0u64; words_per_row * height],
            width,
            height,
            words_per_row,
        };
        if value {
            buffer.fill(true);
        }
        buffer
    }

    /// Create a new bit buffer with all bits cleared.
    #[inline]
    pub fn new_default(width: usize, height: usize) -> Self {
        Self::new_filled(width, height, false)
    }

    /// Create a bit buffer from row-major booleans.
    pub fn from_slice(width: usize, height: usize, data: &[bool]) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length {} does not match dimensions {}x{}",
            data.len(),
            width,
            height
        );
        Self::from_fn(width, height, |x, y| data[y * width + x])
    }

    /// Create a bit buffer by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> bool) -> Self {
        let mut buffer = Self::new_default(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    buffer.set_xy(x, y, true);
                }
            }
        }
        buffer
    }

    /// Like [`BitBuffer2::from_fn`], with rows evaluated in parallel.
    pub fn par_from_fn<F>(width: usize, height: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> bool + Sync,
    {
        let mut buffer = Self::new_default(width, height);
        if buffer.words.is_empty() {
            return buffer;
        }
        let words_per_row = buffer.words_per_row;
        buffer
            .words
            .par_chunks_mut(words_per_row)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width {
                    if f(x, y) {
                        row[x / BITS_PER_WORD] |= 1u64 << (x % BITS_PER_WORD);
                    }
                }
            });
        buffer
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of pixels (`width * height`).
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// The packed words of row `y`.
    #[inline]
    pub fn row_words(&self, y: usize) -> &[u64] {
        let start = y * self.words_per_row;
        &self.words[start..start + self.words_per_row]
    }

    /// Get the bit at a row-major linear index.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len());
        self.get_xy(idx % self.width, idx / self.width)
    }

    #[inline]
    pub fn get_xy(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height);
        let word = self.words[y * self.words_per_row + x / BITS_PER_WORD];
        (word >> (x % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set_xy(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        let word = &mut self.words[y * self.words_per_row + x / BITS_PER_WORD];
        let bit = 1u64 << (x % BITS_PER_WORD);
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    /// Set every pixel to `value`, keeping row padding bits cleared.
    pub fn fill(&mut self, value: bool) {
        if !value {
            self.words.fill(0);
            return;
        }
        if self.words_per_row == 0 {
            return;
        }
        let tail_bits = self.width % BITS_PER_WORD;
        let tail_mask = if tail_bits == 0 {
            !0u64
        } else {
            (1u64 << tail_bits) - 1
        };
        for row in self.words.chunks_mut(self.words_per_row) {
            row.fill(!0u64);
            if let Some(last) = row.last_mut() {
                *last = tail_mask;
            }
        }
    }

    /// Number of set bits, counted in parallel.
    pub fn count_ones(&self) -> usize {
        self.words
            .par_iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// Copies the `width` x `height` rectangle at `(x, y)` into a new buffer
    /// surrounded by `halo` cleared pixels on every side.
    pub fn crop_padded(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        halo: usize,
    ) -> Self {
        assert!(
            x + width <= self.width && y + height <= self.height,
            "crop rectangle {width}x{height} at ({x}, {y}) exceeds {}x{} mask",
            self.width,
            self.height
        );
        let mut padded = Self::new_default(width + 2 * halo, height + 2 * halo);
        for row in 0..height {
            for col in 0..width {
                if self.get_xy(x + col, y + row) {
                    padded.set_xy(col + halo, row + halo, true);
                }
            }
        }
        padded
    }

    /// Iterate over all pixels in row-major order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = bool> + '_ {
        (0..self.len()).map(move |idx| self.get(idx))
    }
}

impl Index<(usize, usize)> for BitBuffer2 {
    type Output = bool;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        if self.get_xy(x, y) {
            &true
        } else {
            &false
        }
    }
}

impl From<&BitBuffer2> for Vec<bool> {
    fn from(buf: &BitBuffer2) -> Self {
        buf.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_word_aligned() {
        let buf = BitBuffer2::new_default(65, 3);
        assert_eq!(buf.words_per_row(), 2);
        assert_eq!(buf.words().len(), 6);
        assert_eq!(buf.row_words(2).len(), 2);
    }

    #[test]
    fn test_fill_true_clears_padding() {
        let buf = BitBuffer2::new_filled(70, 3, true);
        assert_eq!(buf.count_ones(), 210);
        assert_eq!(buf.row_words(1)[1], (1u64 << 6) - 1);
        assert!(buf.iter().all(|bit| bit));
    }

    #[test]
    fn test_set_get_xy_across_word_boundary() {
        let mut buf = BitBuffer2::new_default(100, 4);
        buf.set_xy(63, 1, true);
        buf.set_xy(64, 1, true);
        buf.set_xy(99, 3, true);

        assert!(buf.get_xy(63, 1));
        assert!(buf.get_xy(64, 1));
        assert!(buf.get_xy(99, 3));
        assert!(!buf.get_xy(63, 0));
        assert!(buf.get(100 + 64));
        assert!(buf[(99, 3)]);

        buf.set_xy(64, 1, false);
        assert!(!buf.get_xy(64, 1));
        assert_eq!(buf.count_ones(), 2);
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let data = vec![true, false, true, false, false, true];
        let buf = BitBuffer2::from_slice(3, 2, &data);
        let back: Vec<bool> = (&buf).into();
        assert_eq!(back, data);
    }

    #[test]
    #[should_panic(expected = "data length")]
    fn test_from_slice_wrong_length() {
        BitBuffer2::from_slice(2, 2, &[true, false, true]);
    }

    #[test]
    fn test_par_from_fn_matches_from_fn() {
        let predicate = |x: usize, y: usize| (x * 31 + y * 17) % 5 == 0;
        let sequential = BitBuffer2::from_fn(130, 9, predicate);
        let parallel = BitBuffer2::par_from_fn(130, 9, predicate);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_par_from_fn_empty() {
        let buf = BitBuffer2::par_from_fn(0, 5, |_, _| true);
        assert!(buf.is_empty());
        assert_eq!(buf.count_ones(), 0);
    }

    #[test]
    fn test_crop_padded_adds_cleared_halo() {
        let buf = BitBuffer2::new_filled(6, 5, true);
        let padded = buf.crop_padded(2, 1, 3, 2, 1);
        assert_eq!(padded.width(), 5);
        assert_eq!(padded.height(), 4);
        assert_eq!(padded.count_ones(), 6);
        for x in 0..5 {
            assert!(!padded.get_xy(x, 0));
            assert!(!padded.get_xy(x, 3));
        }
        for y in 0..4 {
            assert!(!padded.get_xy(0, y));
            assert!(!padded.get_xy(4, y));
        }
        assert!(padded.get_xy(1, 1));
        assert!(padded.get_xy(3, 2));
    }

    #[test]
    fn test_crop_padded_copies_pattern() {
        let buf = BitBuffer2::from_fn(8, 8, |x, y| x == y);
        let padded = buf.crop_padded(2, 2, 4, 4, 1);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(padded.get_xy(x + 1, y + 1), x == y, "pixel ({x}, {y})");
            }
        }
    }
}
