//! Grid dimension math and the generic double-buffer pair.

/// Magnification applied to the grid when rendering into the small
/// editing-preview surface, so the preview shows comparable detail.
pub const PREVIEW_MAGNIFIER: u32 = 8;

/// Dimensions of the life and trail grids, in cells. The two grids always
/// share one `GridSize`; it only changes through [`grid_size_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Grid dimensions for a viewport: `floor(dimension / scale)`, magnified
/// when rendering an editing preview. Scale is clamped to >= 1.
pub fn grid_size_for(viewport: (u32, u32), render_scale: u32, preview: bool) -> GridSize {
    let scale = render_scale.max(1);
    let magnifier = if preview { PREVIEW_MAGNIFIER } else { 1 };
    GridSize {
        width: viewport.0 / scale * magnifier,
        height: viewport.1 / scale * magnifier,
    }
}

/// Two buffers plus a toggle deciding which is "previous" and which is
/// "next". Swapping is O(1) and never copies contents; accessors always
/// go through the toggle so no stale alias survives a step.
#[derive(Debug)]
pub struct BufferPair<T> {
    slots: [T; 2],
    flipped: bool,
}

impl<T> BufferPair<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            flipped: false,
        }
    }

    pub fn prev(&self) -> &T {
        &self.slots[self.flipped as usize]
    }

    pub fn next(&self) -> &T {
        &self.slots[(!self.flipped) as usize]
    }

    /// Exchange the previous/next roles.
    pub fn swap(&mut self) {
        self.flipped = !self.flipped;
    }

    /// Which orientation the pair is in; used to pick pre-built bind
    /// groups for the current previous/next assignment.
    pub fn flipped(&self) -> bool {
        self.flipped
    }

    /// Both slots in storage order, ignoring the toggle. For building the
    /// per-orientation bind groups at allocation time.
    pub fn slots(&self) -> (&T, &T) {
        (&self.slots[0], &self.slots[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_floor_by_scale() {
        assert_eq!(
            grid_size_for((512, 512), 8, false),
            GridSize {
                width: 64,
                height: 64
            }
        );
        assert_eq!(
            grid_size_for((1000, 700), 21, false),
            GridSize {
                width: 47,
                height: 33
            }
        );
    }

    #[test]
    fn preview_magnifies_by_eight() {
        let normal = grid_size_for((296, 184), 4, false);
        let preview = grid_size_for((296, 184), 4, true);
        assert_eq!(preview.width, normal.width * PREVIEW_MAGNIFIER);
        assert_eq!(preview.height, normal.height * PREVIEW_MAGNIFIER);
    }

    #[test]
    fn scale_clamps_to_one() {
        assert_eq!(grid_size_for((100, 50), 0, false), grid_size_for((100, 50), 1, false));
    }

    #[test]
    fn degenerate_viewports_are_empty() {
        assert!(grid_size_for((0, 480), 8, false).is_empty());
        assert!(grid_size_for((7, 7), 8, false).is_empty());
    }

    #[test]
    fn swap_exchanges_identities_without_copying() {
        let mut pair = BufferPair::new(vec![1u8], vec![2u8]);
        let prev_ptr = pair.prev().as_ptr();
        let next_ptr = pair.next().as_ptr();
        assert_ne!(prev_ptr, next_ptr);

        pair.swap();
        assert_eq!(pair.prev().as_ptr(), next_ptr);
        assert_eq!(pair.next().as_ptr(), prev_ptr);

        pair.swap();
        assert_eq!(pair.prev().as_ptr(), prev_ptr);
    }

    #[test]
    fn slots_are_stable_across_swaps() {
        let mut pair = BufferPair::new(10, 20);
        let (a, b) = pair.slots();
        assert_eq!((*a, *b), (10, 20));
        pair.swap();
        let (a, b) = pair.slots();
        assert_eq!((*a, *b), (10, 20));
        assert_eq!(*pair.prev(), 20);
    }
}
