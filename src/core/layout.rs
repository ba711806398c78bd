// Canvas layout: the single placement formula shared by composition and decomposition
//
// Every rectangle on the canvas is a pure function of (role, index, height).
// The composer calls `plan` to build the arena; the decomposer calls `slot`
// again for each record and refuses to crop if the two disagree.

use serde::{Deserialize, Serialize};

use crate::core::errors::LayoutError;
use crate::core::types::ImageRole;

pub const CANVAS_WIDTH: u32 = 4000;
pub const CANVAS_HEIGHT: u32 = 6000;
pub const HALF_WIDTH: u32 = CANVAS_WIDTH / 2;

pub const PRIMARY_SIZE: u32 = 1000;
/// Primary image height plus the separator gap that keeps the translation
/// service from joining text across neighbouring images
pub const PRIMARY_STRIDE: u32 = 1250;
pub const MAX_PRIMARY_IMAGES: usize = 5;

pub const DESCRIPTION_WIDTH: u32 = 860;
pub const SEGMENT_MAX_HEIGHT: u32 = 3000;
pub const MAX_SEGMENTS: usize = 6;
/// Tallest description strip that still fits the canvas
pub const STRIP_MAX_HEIGHT: u32 = SEGMENT_MAX_HEIGHT * MAX_SEGMENTS as u32;
pub const SEGMENTS_PER_COLUMN: usize = 2;
pub const DESCRIPTION_COLUMN_X: u32 = 1140;
pub const DESCRIPTION_COLUMN_STRIDE: u32 = 1000;

/// Axis-aligned rectangle in canvas coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// One of the two vertical slices the canvas is cut into before translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Half {
    Left,
    Right,
}

impl Half {
    pub const BOTH: [Half; 2] = [Half::Left, Half::Right];

    /// X offset of this half within the full canvas
    pub fn origin_x(self) -> u32 {
        match self {
            Half::Left => 0,
            Half::Right => HALF_WIDTH,
        }
    }

    /// The half that fully contains `rect`, or `None` if it straddles the
    /// bisection line or leaves the canvas.
    pub fn containing(rect: &Rect) -> Option<Half> {
        if rect.bottom() > CANVAS_HEIGHT || rect.right() > CANVAS_WIDTH {
            return None;
        }
        if rect.right() <= HALF_WIDTH {
            Some(Half::Left)
        } else if rect.x >= HALF_WIDTH {
            Some(Half::Right)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Half::Left => "left",
            Half::Right => "right",
        }
    }
}

/// Where one source image (or description page segment) sits on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub role: ImageRole,
    pub index: usize,
    pub half: Half,
    /// Canvas coordinates, not half-local
    pub rect: Rect,
}

impl PlacementRecord {
    /// Rectangle translated into the coordinate space of `self.half`
    pub fn local_rect(&self) -> Rect {
        Rect {
            x: self.rect.x - self.half.origin_x(),
            ..self.rect
        }
    }
}

/// Rectangle and half for a single slot.
///
/// Primary slots are fixed 1000×1000 squares down the first column. Description
/// slot `index` is page segment `index`: column `index / 2`, row `index % 2`.
pub fn slot(role: ImageRole, index: usize, height: u32) -> Result<(Rect, Half), LayoutError> {
    let rect = match role {
        ImageRole::Primary => {
            if index >= MAX_PRIMARY_IMAGES {
                return Err(LayoutError::SlotOutOfRange { role, index });
            }
            if height != PRIMARY_SIZE {
                return Err(LayoutError::InvalidHeight { role, index, height });
            }
            Rect::new(0, index as u32 * PRIMARY_STRIDE, PRIMARY_SIZE, PRIMARY_SIZE)
        }
        ImageRole::Description => {
            if index >= MAX_SEGMENTS {
                return Err(LayoutError::SlotOutOfRange { role, index });
            }
            if height == 0 || height > SEGMENT_MAX_HEIGHT {
                return Err(LayoutError::InvalidHeight { role, index, height });
            }
            let column = (index / SEGMENTS_PER_COLUMN) as u32;
            let row = (index % SEGMENTS_PER_COLUMN) as u32;
            Rect::new(
                DESCRIPTION_COLUMN_X + column * DESCRIPTION_COLUMN_STRIDE,
                row * SEGMENT_MAX_HEIGHT,
                DESCRIPTION_WIDTH,
                height,
            )
        }
    };

    let half = Half::containing(&rect).ok_or(LayoutError::StraddlesHalves { role, index, rect })?;
    Ok((rect, half))
}

/// Heights of the page segments cut from a strip of stacked description images.
///
/// Every segment is `SEGMENT_MAX_HEIGHT` tall except possibly the last. The
/// result never holds more than `MAX_SEGMENTS` entries and never a zero height.
pub fn segment_heights(image_heights: &[u32]) -> Vec<u32> {
    let stacked: u64 = image_heights.iter().map(|&h| u64::from(h)).sum();
    let mut remaining = stacked.min(u64::from(STRIP_MAX_HEIGHT));

    let mut segments = Vec::with_capacity(MAX_SEGMENTS);
    while remaining > 0 && segments.len() < MAX_SEGMENTS {
        let height = remaining.min(SEGMENT_MAX_HEIGHT as u64);
        segments.push(height as u32);
        remaining -= height;
    }
    segments
}

/// Build the placement arena for one product.
///
/// `primary_count` is clamped to `MAX_PRIMARY_IMAGES`; description images are
/// given as their resized heights (all at `DESCRIPTION_WIDTH`).
pub fn plan(primary_count: usize, description_heights: &[u32]) -> Result<PlacementArena, LayoutError> {
    let mut records = Vec::new();

    for index in 0..primary_count.min(MAX_PRIMARY_IMAGES) {
        let (rect, half) = slot(ImageRole::Primary, index, PRIMARY_SIZE)?;
        records.push(PlacementRecord {
            role: ImageRole::Primary,
            index,
            half,
            rect,
        });
    }

    for (index, height) in segment_heights(description_heights).into_iter().enumerate() {
        let (rect, half) = slot(ImageRole::Description, index, height)?;
        records.push(PlacementRecord {
            role: ImageRole::Description,
            index,
            half,
            rect,
        });
    }

    let arena = PlacementArena { records };
    arena.check_disjoint()?;
    Ok(arena)
}

/// Ordered, per-product list of placement records.
///
/// Owned by one product's pipeline run and handed from composer to
/// decomposer by value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementArena {
    records: Vec<PlacementRecord>,
}

impl PlacementArena {
    pub fn records(&self) -> &[PlacementRecord] {
        &self.records
    }

    pub fn get(&self, role: ImageRole, index: usize) -> Option<&PlacementRecord> {
        self.records
            .iter()
            .find(|r| r.role == role && r.index == index)
    }

    pub fn by_role(&self, role: ImageRole) -> impl Iterator<Item = &PlacementRecord> {
        self.records.iter().filter(move |r| r.role == role)
    }

    pub fn count(&self, role: ImageRole) -> usize {
        self.by_role(role).count()
    }

    pub fn by_half(&self, half: Half) -> impl Iterator<Item = &PlacementRecord> {
        self.records.iter().filter(move |r| r.half == half)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_disjoint(&self) -> Result<(), LayoutError> {
        for (i, a) in self.records.iter().enumerate() {
            for b in &self.records[i + 1..] {
                if a.rect.intersects(&b.rect) {
                    return Err(LayoutError::Overlap {
                        first: (a.role, a.index),
                        second: (b.role, b.index),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_heights_partial_last() {
        assert_eq!(segment_heights(&[1000, 2500]), vec![3000, 500]);
    }

    #[test]
    fn test_segment_heights_exact_boundary_has_no_empty_tail() {
        assert_eq!(segment_heights(&[1200; 5]), vec![3000, 3000]);
        assert_eq!(segment_heights(&[3000]), vec![3000]);
    }

    #[test]
    fn test_segment_heights_clamped_to_max() {
        let heights = segment_heights(&[5000; 10]);
        assert_eq!(heights.len(), MAX_SEGMENTS);
        assert!(heights.iter().all(|&h| h == SEGMENT_MAX_HEIGHT));
    }

    #[test]
    fn test_segment_heights_empty() {
        assert!(segment_heights(&[]).is_empty());
        assert!(segment_heights(&[0, 0]).is_empty());
    }

    #[test]
    fn test_primary_slots_step_down_first_column() {
        for index in 0..MAX_PRIMARY_IMAGES {
            let (rect, half) = slot(ImageRole::Primary, index, PRIMARY_SIZE).unwrap();
            assert_eq!(rect, Rect::new(0, index as u32 * 1250, 1000, 1000));
            assert_eq!(half, Half::Left);
        }
        // Last primary ends exactly on the canvas edge
        let (last, _) = slot(ImageRole::Primary, 4, PRIMARY_SIZE).unwrap();
        assert_eq!(last.bottom(), CANVAS_HEIGHT);
    }

    #[test]
    fn test_primary_slot_rejects_sixth_image() {
        assert!(matches!(
            slot(ImageRole::Primary, 5, PRIMARY_SIZE),
            Err(LayoutError::SlotOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn test_description_columns_and_halves() {
        let expected = [
            (1140, 0, Half::Left),
            (1140, 3000, Half::Left),
            (2140, 0, Half::Right),
            (2140, 3000, Half::Right),
            (3140, 0, Half::Right),
            (3140, 3000, Half::Right),
        ];
        for (index, (x, y, half)) in expected.into_iter().enumerate() {
            let (rect, got_half) = slot(ImageRole::Description, index, 3000).unwrap();
            assert_eq!((rect.x, rect.y, rect.width), (x, y, DESCRIPTION_WIDTH));
            assert_eq!(got_half, half, "segment {index}");
        }
    }

    #[test]
    fn test_description_slot_rejects_bad_heights() {
        assert!(slot(ImageRole::Description, 0, 0).is_err());
        assert!(slot(ImageRole::Description, 0, 3001).is_err());
        assert!(slot(ImageRole::Description, 6, 100).is_err());
    }

    #[test]
    fn test_half_containing() {
        assert_eq!(Half::containing(&Rect::new(1140, 0, 860, 10)), Some(Half::Left));
        assert_eq!(Half::containing(&Rect::new(2000, 0, 10, 10)), Some(Half::Right));
        assert_eq!(Half::containing(&Rect::new(1990, 0, 20, 10)), None);
        assert_eq!(Half::containing(&Rect::new(3990, 0, 20, 10)), None);
        assert_eq!(Half::containing(&Rect::new(0, 5990, 10, 20)), None);
    }

    #[test]
    fn test_local_rect_offsets_right_half() {
        let (rect, half) = slot(ImageRole::Description, 4, 1200).unwrap();
        let record = PlacementRecord {
            role: ImageRole::Description,
            index: 4,
            half,
            rect,
        };
        assert_eq!(record.local_rect(), Rect::new(1140, 0, 860, 1200));
    }

    #[test]
    fn test_plan_example_product_stays_in_left_half() {
        let arena = plan(3, &[1200; 5]).unwrap();
        assert_eq!(arena.count(ImageRole::Primary), 3);
        assert_eq!(arena.count(ImageRole::Description), 2);
        assert!(arena.records().iter().all(|r| r.half == Half::Left));
        assert_eq!(arena.by_half(Half::Right).count(), 0);
    }

    #[test]
    fn test_plan_full_canvas_is_disjoint_and_in_bounds() {
        let arena = plan(9, &[4000; 8]).unwrap();
        assert_eq!(arena.count(ImageRole::Primary), MAX_PRIMARY_IMAGES);
        assert_eq!(arena.count(ImageRole::Description), MAX_SEGMENTS);

        for record in arena.records() {
            let local = record.local_rect();
            assert!(local.right() <= HALF_WIDTH);
            assert!(local.bottom() <= CANVAS_HEIGHT);
        }
        for (i, a) in arena.records().iter().enumerate() {
            for b in &arena.records()[i + 1..] {
                assert!(!a.rect.intersects(&b.rect));
            }
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let heights = [700, 2900, 1800, 3100, 50];
        let first = plan(2, &heights).unwrap();
        for _ in 0..10 {
            assert_eq!(plan(2, &heights).unwrap(), first);
        }
    }

    #[test]
    fn test_arena_lookup_by_role_and_index() {
        let arena = plan(2, &[3000, 1000]).unwrap();
        let record = arena.get(ImageRole::Description, 1).unwrap();
        assert_eq!(record.rect, Rect::new(1140, 3000, 860, 1000));
        assert!(arena.get(ImageRole::Primary, 2).is_none());
    }
}
