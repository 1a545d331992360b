//! Foreground segmentation of a background-removed image and selection of
//! the leaf region.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::{
    map::map_colors,
    region_labelling::{connected_components, Connectivity},
};
use tracing::debug;

use crate::errors::{LeafDiseaseError, Result};

/// Gray values strictly above this are foreground.
pub const FOREGROUND_THRESHOLD: u8 = 20;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Pixel extents of a region. Minimums are inclusive, maximums exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub min_row: u32,
    pub min_col: u32,
    pub max_row: u32,
    pub max_col: u32,
}

impl BoundingBox {
    pub const fn width(&self) -> u32 {
        self.max_col.saturating_sub(self.min_col)
    }

    pub const fn height(&self) -> u32 {
        self.max_row.saturating_sub(self.min_row)
    }

    pub const fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    fn single_pixel(row: u32, col: u32) -> Self {
        Self {
            min_row: row,
            min_col: col,
            max_row: row + 1,
            max_col: col + 1,
        }
    }

    fn include(&mut self, row: u32, col: u32) {
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row + 1);
        self.max_col = self.max_col.max(col + 1);
    }
}

/// One connected foreground component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Label id, unique within one segmentation pass. Assigned in raster
    /// scan order starting at 1.
    pub label: u32,
    pub bbox: BoundingBox,
    /// Number of foreground pixels in the component.
    pub area: u64,
}

/// BT.601 luma in 14-bit fixed point, rounded to nearest.
#[inline]
pub fn gray_value(Rgb([r, g, b]): Rgb<u8>) -> u8 {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    ((u32::from(r) * R + u32::from(g) * G + u32::from(b) * B + (1 << (SHIFT - 1))) >> SHIFT) as u8
}

/// Converts a background-removed image into a binary foreground mask.
pub fn segment(image_no_bg: &RgbImage) -> GrayImage {
    map_colors(image_no_bg, |pixel| {
        if gray_value(pixel) > FOREGROUND_THRESHOLD {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    })
}

/// Labels the 8-connected components of `mask` and measures each one.
///
/// Zero is background. The result is ordered by label and is empty when the
/// mask has no foreground.
pub fn label_regions(mask: &GrayImage) -> Vec<Region> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([BACKGROUND]));

    let mut regions: Vec<Region> = Vec::new();
    for (col, row, &Luma([label])) in labels.enumerate_pixels() {
        if label == 0 {
            continue;
        }

        let index = (label - 1) as usize;
        if index >= regions.len() {
            // placeholders for labels not seen yet are dropped below if unused
            regions.resize_with(index + 1, || Region {
                label: 0,
                bbox: BoundingBox::single_pixel(row, col),
                area: 0,
            });
        }

        let region = &mut regions[index];
        if region.area == 0 {
            region.label = label;
            region.bbox = BoundingBox::single_pixel(row, col);
        } else {
            region.bbox.include(row, col);
        }
        region.area += 1;
    }

    regions.retain(|region| region.area > 0);
    debug!(count = regions.len(), "labelled foreground regions");
    regions
}

/// Picks the region with the largest area. Ties go to the lowest label.
pub fn select_leaf(regions: &[Region]) -> Result<Region> {
    let leaf = regions
        .iter()
        .copied()
        .reduce(|best, candidate| {
            if candidate.area > best.area
                || (candidate.area == best.area && candidate.label < best.label)
            {
                candidate
            } else {
                best
            }
        })
        .ok_or(LeafDiseaseError::NoLeafDetected)?;

    debug!(
        label = leaf.label,
        area = leaf.area,
        bbox = ?leaf.bbox,
        "selected leaf region"
    );
    Ok(leaf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paint(image: &mut RgbImage, bbox: BoundingBox, color: Rgb<u8>) {
        for row in bbox.min_row..bbox.max_row {
            for col in bbox.min_col..bbox.max_col {
                image.put_pixel(col, row, color);
            }
        }
    }

    fn region(label: u32, area: u64) -> Region {
        Region {
            label,
            bbox: BoundingBox::single_pixel(0, 0),
            area,
        }
    }

    #[test]
    fn test_gray_value_uses_bt601_weights() {
        assert_eq!(gray_value(Rgb([0, 0, 0])), 0);
        assert_eq!(gray_value(Rgb([255, 255, 255])), 255);
        assert_eq!(gray_value(Rgb([255, 0, 0])), 76);
        assert_eq!(gray_value(Rgb([0, 255, 0])), 150);
        assert_eq!(gray_value(Rgb([0, 0, 255])), 29);
    }

    #[test]
    fn test_threshold_boundary() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([20, 20, 20]));
        image.put_pixel(1, 0, Rgb([21, 21, 21]));

        let mask = segment(&image);
        assert_eq!(mask.get_pixel(0, 0), &Luma([0]));
        assert_eq!(mask.get_pixel(1, 0), &Luma([255]));
    }

    #[test]
    fn test_all_black_image_has_no_regions() {
        let image = RgbImage::new(64, 48);
        let regions = label_regions(&segment(&image));
        assert!(regions.is_empty());

        let err = select_leaf(&regions).unwrap_err();
        assert!(err.is_no_leaf());
    }

    #[test]
    fn test_rectangle_bbox_matches_patch() {
        let patch = BoundingBox {
            min_row: 10,
            min_col: 15,
            max_row: 30,
            max_col: 40,
        };
        let mut image = RgbImage::new(80, 60);
        paint(&mut image, patch, Rgb([200, 220, 180]));

        let regions = label_regions(&segment(&image));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].label, 1);
        assert_eq!(regions[0].bbox, patch);
        assert_eq!(regions[0].area, 20 * 25);
    }

    #[test]
    fn test_diagonal_pixels_are_one_component() {
        let mut image = RgbImage::new(4, 4);
        for i in 0..4 {
            image.put_pixel(i, i, Rgb([255, 255, 255]));
        }

        let regions = label_regions(&segment(&image));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 4);
        assert_eq!(
            regions[0].bbox,
            BoundingBox {
                min_row: 0,
                min_col: 0,
                max_row: 4,
                max_col: 4,
            }
        );
    }

    #[test]
    fn test_larger_blob_wins_regardless_of_label_order() {
        let small = BoundingBox {
            min_row: 0,
            min_col: 0,
            max_row: 3,
            max_col: 3,
        };
        let large = BoundingBox {
            min_row: 10,
            min_col: 10,
            max_row: 30,
            max_col: 25,
        };
        let mut image = RgbImage::new(40, 40);
        paint(&mut image, small, Rgb([90, 160, 60]));
        paint(&mut image, large, Rgb([90, 160, 60]));

        let regions = label_regions(&segment(&image));
        assert_eq!(regions.len(), 2);
        // the small blob is met first in raster order
        assert_eq!(regions[0].bbox, small);

        let leaf = select_leaf(&regions).unwrap();
        assert_eq!(leaf.bbox, large);
        assert_eq!(leaf.area, 20 * 15);

        let mut reversed = regions.clone();
        reversed.reverse();
        assert_eq!(select_leaf(&reversed).unwrap().bbox, large);
    }

    #[test]
    fn test_tie_goes_to_lowest_label() {
        let regions = [region(3, 50), region(1, 50), region(2, 10)];
        assert_eq!(select_leaf(&regions).unwrap().label, 1);
    }
}
