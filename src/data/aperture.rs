use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use super::model::{Offset, Pixel};

// ---------------------------------------------------------------------------
// AperturePixel – one pixel plus its aperture memberships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AperturePixel {
    pub pixel: Pixel,
    pub in_optimal_aperture: bool,
    pub in_flux_weighted_centroid_aperture: bool,
    pub in_prf_centroid_aperture: bool,
}

impl AperturePixel {
    pub fn new(pixel: Pixel) -> Self {
        AperturePixel {
            pixel,
            in_optimal_aperture: false,
            in_flux_weighted_centroid_aperture: false,
            in_prf_centroid_aperture: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Aperture – per-target offset → pixel map
// ---------------------------------------------------------------------------

/// The pixels collected for one target, keyed by offset from the target's
/// reference pixel. Equality ignores insertion order.
#[derive(Debug, Clone, Default)]
pub struct Aperture {
    pixels: BTreeMap<Offset, AperturePixel>,
}

impl Aperture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the pixel at `offset`.
    pub fn add_pixel(&mut self, offset: Offset, pixel: AperturePixel) {
        self.pixels.insert(offset, pixel);
    }

    pub fn pixel(&self, offset: Offset) -> Option<&AperturePixel> {
        self.pixels.get(&offset)
    }

    pub fn pixels(&self) -> impl Iterator<Item = &AperturePixel> {
        self.pixels.values()
    }

    /// `(offset, pixel)` pairs in offset order.
    pub fn entries(&self) -> impl Iterator<Item = (Offset, &AperturePixel)> {
        self.pixels.iter().map(|(offset, pixel)| (*offset, pixel))
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Rows and columns touched by optimal-aperture pixels.
    pub fn optimal_projections(&self) -> (BTreeSet<i32>, BTreeSet<i32>) {
        let mut rows = BTreeSet::new();
        let mut columns = BTreeSet::new();
        for pixel in self.pixels().filter(|p| p.in_optimal_aperture) {
            rows.insert(pixel.pixel.row);
            columns.insert(pixel.pixel.column);
        }
        (rows, columns)
    }

    pub fn optimal_pixels(&self) -> BTreeSet<Pixel> {
        self.pixels()
            .filter(|p| p.in_optimal_aperture)
            .map(|p| p.pixel)
            .collect()
    }

    /// Human-readable differences between `self` and `other`, compared by
    /// offset. Empty when the apertures agree.
    pub fn diff(&self, other: &Aperture) -> Vec<String> {
        let mut differences = Vec::new();

        for (offset, pixel) in &self.pixels {
            let Some(other_pixel) = other.pixels.get(offset) else {
                differences.push(format!(
                    "pixel {} at offset ({}, {}) missing from other aperture",
                    pixel.pixel, offset.row, offset.column
                ));
                continue;
            };
            if pixel.pixel != other_pixel.pixel {
                differences.push(format!(
                    "offset ({}, {}): pixel {} != {}",
                    offset.row, offset.column, pixel.pixel, other_pixel.pixel
                ));
            }
            let flags = [
                (
                    "optimal aperture",
                    pixel.in_optimal_aperture,
                    other_pixel.in_optimal_aperture,
                ),
                (
                    "flux-weighted centroid aperture",
                    pixel.in_flux_weighted_centroid_aperture,
                    other_pixel.in_flux_weighted_centroid_aperture,
                ),
                (
                    "PRF centroid aperture",
                    pixel.in_prf_centroid_aperture,
                    other_pixel.in_prf_centroid_aperture,
                ),
            ];
            for (name, mine, theirs) in flags {
                if mine != theirs {
                    differences.push(format!(
                        "pixel {}: in {name} {mine} != {theirs}",
                        pixel.pixel
                    ));
                }
            }
        }

        for (offset, pixel) in &other.pixels {
            if !self.pixels.contains_key(offset) {
                differences.push(format!(
                    "pixel {} at offset ({}, {}) missing from this aperture",
                    pixel.pixel, offset.row, offset.column
                ));
            }
        }

        differences
    }

    fn membership(&self) -> BTreeSet<&AperturePixel> {
        self.pixels.values().collect()
    }
}

impl PartialEq for Aperture {
    fn eq(&self, other: &Self) -> bool {
        self.membership() == other.membership()
    }
}

impl Eq for Aperture {}

impl Hash for Aperture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for pixel in self.membership() {
            pixel.hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(row: i32, column: i32, optimal: bool) -> AperturePixel {
        AperturePixel {
            in_optimal_aperture: optimal,
            ..AperturePixel::new(Pixel::new(row, column))
        }
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let mut a = Aperture::new();
        a.add_pixel(Offset::new(0, 0), pixel(10, 20, true));
        a.add_pixel(Offset::new(0, 1), pixel(10, 21, false));

        let mut b = Aperture::new();
        b.add_pixel(Offset::new(0, 1), pixel(10, 21, false));
        b.add_pixel(Offset::new(0, 0), pixel(10, 20, true));

        assert_eq!(a, b);
        assert!(a.diff(&b).is_empty());
    }

    #[test]
    fn diff_reports_flags_and_one_sided_pixels() {
        let mut a = Aperture::new();
        a.add_pixel(Offset::new(0, 0), pixel(10, 20, true));
        a.add_pixel(Offset::new(1, 0), pixel(11, 20, true));

        let mut b = Aperture::new();
        b.add_pixel(Offset::new(0, 0), pixel(10, 20, false));
        b.add_pixel(Offset::new(0, 2), pixel(10, 22, false));

        let differences = a.diff(&b);
        assert_eq!(differences.len(), 3, "{differences:?}");
        assert!(differences[0].contains("optimal aperture true != false"));
        assert!(differences[1].contains("missing from other"));
        assert!(differences[2].contains("missing from this"));
        assert_ne!(a, b);
    }

    #[test]
    fn projections_only_use_optimal_pixels() {
        let mut a = Aperture::new();
        a.add_pixel(Offset::new(0, 0), pixel(10, 20, true));
        a.add_pixel(Offset::new(1, 1), pixel(11, 21, false));
        let (rows, columns) = a.optimal_projections();
        assert_eq!(rows.into_iter().collect::<Vec<_>>(), vec![10]);
        assert_eq!(columns.into_iter().collect::<Vec<_>>(), vec![20]);
    }
}
