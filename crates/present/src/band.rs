//! Band layout math.
//!
//! A caller buffer holds `bands` stacked `width x height` frames of 4-byte
//! pixels, forming one tall `width x (height * bands)` image. Presenting at a
//! byte offset shows the `height` rows starting at scan line
//! `offset / bytes_per_row`, wrapping from the bottom of the tall image back
//! to its top. The wrap means at most two contiguous row spans are visible.
//!
//! # Example
//!
//! ```
//! use bridge_present::BandLayout;
//!
//! // Three 4x2 bands
//! let layout = BandLayout::from_len(4 * 2 * 4 * 3, 4, 2, 3).unwrap();
//! assert_eq!(layout.bands(), 3);
//! assert_eq!(layout.total_rows(), 6);
//!
//! // One band down
//! let rows = layout.visible_rows(2 * layout.bytes_per_row() as u64);
//! assert_eq!(rows.spans()[0].src_row, 2);
//!
//! // Offset K*H rows wraps back to the top
//! let wrapped = layout.visible_rows(6 * layout.bytes_per_row() as u64);
//! assert_eq!(wrapped, layout.visible_rows(0));
//! ```

use crate::error::{PresentError, PresentResult};

/// Bytes per packed pixel. Fixed for every supported format.
pub const BYTES_PER_PIXEL: usize = bridge_core::PixelFormat::BYTES_PER_PIXEL;

/// Geometry of a (possibly banded) caller pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BandLayout {
    width: u32,
    height: u32,
    bands: u32,
}

impl BandLayout {
    /// Creates a layout. Returns `None` if any dimension is zero or the total
    /// size does not fit in memory.
    pub fn new(width: u32, height: u32, bands: u32) -> Option<Self> {
        if width == 0 || height == 0 || bands == 0 {
            return None;
        }
        let layout = Self {
            width,
            height,
            bands,
        };
        layout.checked_total_bytes().map(|_| layout)
    }

    /// Picks the layout a buffer of `len` bytes describes.
    ///
    /// Exactly `width * height * 4 * band_count` bytes gives `band_count`
    /// bands; exactly `width * height * 4` gives one band.
    ///
    /// # Errors
    ///
    /// [`PresentError::InvalidSize`] for zero or overflowing dimensions,
    /// [`PresentError::LengthMismatch`] for any other length.
    pub fn from_len(len: usize, width: u32, height: u32, band_count: u32) -> PresentResult<Self> {
        let single = Self::new(width, height, 1).ok_or(PresentError::InvalidSize { width, height })?;
        let banded = Self::new(width, height, band_count.max(1))
            .ok_or(PresentError::InvalidSize { width, height })?;

        if len == banded.total_bytes() {
            Ok(banded)
        } else if len == single.total_bytes() {
            Ok(single)
        } else {
            Err(PresentError::LengthMismatch {
                len,
                expected_single: single.total_bytes(),
                expected_banded: banded.total_bytes(),
            })
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of stacked bands (K).
    #[inline]
    pub fn bands(&self) -> u32 {
        self.bands
    }

    /// Bytes in one scan line.
    #[inline]
    pub fn bytes_per_row(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Bytes in one band.
    #[inline]
    pub fn band_bytes(&self) -> usize {
        self.bytes_per_row() * self.height as usize
    }

    /// Rows in the tall image.
    #[inline]
    pub fn total_rows(&self) -> u32 {
        self.height * self.bands
    }

    /// Bytes in the whole buffer.
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.band_bytes() * self.bands as usize
    }

    fn checked_total_bytes(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(BYTES_PER_PIXEL)?
            .checked_mul(self.height as usize)?
            .checked_mul(self.bands as usize)
            .filter(|_| self.height.checked_mul(self.bands).is_some())
    }

    /// First visible scan line for `offset_bytes`. Partial scan lines are truncated.
    #[inline]
    pub fn start_row(&self, offset_bytes: u64) -> u32 {
        let row = offset_bytes / self.bytes_per_row() as u64;
        (row % u64::from(self.total_rows())) as u32
    }

    /// Rows of the tall image visible at `offset_bytes`, in display order.
    pub fn visible_rows(&self, offset_bytes: u64) -> VisibleRows {
        let start = self.start_row(offset_bytes);
        let first = (self.total_rows() - start).min(self.height);

        let mut rows = VisibleRows {
            spans: [RowSpan::default(); 2],
            count: 1,
        };
        rows.spans[0] = RowSpan {
            src_row: start,
            dst_row: 0,
            rows: first,
        };
        if first < self.height {
            rows.spans[1] = RowSpan {
                src_row: 0,
                dst_row: first,
                rows: self.height - first,
            };
            rows.count = 2;
        }
        rows
    }
}

/// A run of consecutive rows copied from the tall image to the display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RowSpan {
    /// First row in the tall image.
    pub src_row: u32,
    /// First row on the display.
    pub dst_row: u32,
    /// Number of rows.
    pub rows: u32,
}

impl RowSpan {
    /// Byte offset of the span's first row in the caller buffer.
    #[inline]
    pub fn src_offset(&self, layout: &BandLayout) -> usize {
        self.src_row as usize * layout.bytes_per_row()
    }
}

/// One or two row spans covering exactly one band's height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibleRows {
    spans: [RowSpan; 2],
    count: usize,
}

impl VisibleRows {
    #[inline]
    pub fn spans(&self) -> &[RowSpan] {
        &self.spans[..self.count]
    }

    /// True when the visible window wraps past the bottom of the tall image.
    #[inline]
    pub fn wraps(&self) -> bool {
        self.count == 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_len_accepts_both_layouts() {
        let banded = BandLayout::from_len(4 * 4 * 4 * 3, 4, 4, 3).unwrap();
        assert_eq!(banded.bands(), 3);
        let single = BandLayout::from_len(4 * 4 * 4, 4, 4, 3).unwrap();
        assert_eq!(single.bands(), 1);
    }

    #[test]
    fn test_from_len_rejects_other_lengths() {
        let err = BandLayout::from_len(4 * 4 * 4 * 2, 4, 4, 3).unwrap_err();
        match err {
            PresentError::LengthMismatch {
                len,
                expected_single,
                expected_banded,
            } => {
                assert_eq!(len, 128);
                assert_eq!(expected_single, 64);
                assert_eq!(expected_banded, 192);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(BandLayout::from_len(0, 4, 4, 3).is_err());
    }

    #[test]
    fn test_from_len_rejects_zero_size() {
        assert!(matches!(
            BandLayout::from_len(0, 0, 4, 3),
            Err(PresentError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_band_one_selected_by_band_offset() {
        let layout = BandLayout::new(4, 5, 3).unwrap();
        let offset = 5 * layout.bytes_per_row() as u64;
        let rows = layout.visible_rows(offset);
        assert!(!rows.wraps());
        assert_eq!(
            rows.spans(),
            &[RowSpan {
                src_row: 5,
                dst_row: 0,
                rows: 5
            }]
        );
    }

    #[test]
    fn test_wrap_at_full_height_matches_zero() {
        let layout = BandLayout::new(8, 3, 3).unwrap();
        let full = 9 * layout.bytes_per_row() as u64;
        assert_eq!(layout.visible_rows(full), layout.visible_rows(0));
    }

    #[test]
    fn test_partial_wrap_splits_in_two() {
        let layout = BandLayout::new(2, 4, 3).unwrap();
        // Start at row 10 of 12: rows 10, 11, then 0, 1.
        let rows = layout.visible_rows(10 * layout.bytes_per_row() as u64);
        assert!(rows.wraps());
        assert_eq!(
            rows.spans(),
            &[
                RowSpan {
                    src_row: 10,
                    dst_row: 0,
                    rows: 2
                },
                RowSpan {
                    src_row: 0,
                    dst_row: 2,
                    rows: 2
                },
            ]
        );
    }

    #[test]
    fn test_partial_scan_line_truncates() {
        let layout = BandLayout::new(4, 4, 3).unwrap();
        let bpr = layout.bytes_per_row() as u64;
        assert_eq!(layout.start_row(bpr + 3), 1);
    }

    proptest! {
        #[test]
        fn prop_visible_rows_cover_one_band(
            width in 1u32..64,
            height in 1u32..64,
            bands in 1u32..8,
            offset in any::<u32>(),
        ) {
            let layout = BandLayout::new(width, height, bands).unwrap();
            let rows = layout.visible_rows(u64::from(offset));

            let mut next_dst = 0;
            for span in rows.spans() {
                prop_assert_eq!(span.dst_row, next_dst);
                prop_assert!(span.rows > 0);
                prop_assert!(span.src_row + span.rows <= layout.total_rows());
                next_dst += span.rows;
            }
            prop_assert_eq!(next_dst, height);
            prop_assert_eq!(rows.spans()[0].src_row, layout.start_row(u64::from(offset)));
        }

        #[test]
        fn prop_offsets_are_periodic(
            width in 1u32..32,
            height in 1u32..32,
            bands in 1u32..6,
            row in 0u32..512,
        ) {
            let layout = BandLayout::new(width, height, bands).unwrap();
            let bpr = layout.bytes_per_row() as u64;
            let period = u64::from(layout.total_rows()) * bpr;
            let offset = u64::from(row) * bpr;
            prop_assert_eq!(layout.visible_rows(offset), layout.visible_rows(offset + period));
        }
    }
}
