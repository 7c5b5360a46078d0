// Raw voxel storage for the headless host world.
//
// One `Vec<VoxelType>` laid out in horizontal slabs: a slab per y level,
// rows of x within each slab, so a column scan touches one cell per slab and
// a row scan is contiguous. Reads outside the box come back as `Bedrock`,
// which makes the border solid and unbreakable for every query built on top;
// writes outside the box are dropped.
//
// `line_obstruction()` walks the cells a segment crosses (grid traversal in
// the style of Amanatides & Woo) and tallies what it meets: breakable solids
// are counted, the first unbreakable solid ends the walk. Target visibility
// and the carving walkability test both sit on it.
//
// See also: `grid.rs` for the cached query layer every other module reads
// through, `sim.rs` which owns the `Grid` as part of `SimWorld`.
//
// **Critical constraint: determinism.** Terrain only changes through
// `Grid::break_cell` during a run, or through scenario setup before one.

use crate::types::{Vec3, VoxelCoord, VoxelType};

/// Dense box of voxels anchored at the origin.
#[derive(Clone, Debug, Default)]
pub struct VoxelWorld {
    voxels: Vec<VoxelType>,
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
}

/// What lies on a straight segment between two points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineObstruction {
    /// Breakable solid voxels crossed before the destination.
    pub breakable: u32,
    /// Whether an unbreakable voxel was hit (traversal stops there).
    pub unbreakable: bool,
}

/// Traversal state along one axis.
#[derive(Clone, Copy)]
struct AxisWalk {
    step: i32,
    /// Segment parameter at which the next boundary on this axis is crossed.
    next: f32,
    /// Parameter distance between boundaries.
    delta: f32,
}

impl AxisWalk {
    fn new(origin: f32, span: f32) -> Self {
        let cell = origin.floor();
        if span > 0.0 {
            Self {
                step: 1,
                next: (cell + 1.0 - origin) / span,
                delta: 1.0 / span,
            }
        } else if span < 0.0 {
            Self {
                step: -1,
                next: (origin - cell) / -span,
                delta: 1.0 / -span,
            }
        } else {
            Self {
                step: 0,
                next: f32::INFINITY,
                delta: f32::INFINITY,
            }
        }
    }
}

impl VoxelWorld {
    /// An all-air world of the given size.
    pub fn new(size_x: u32, size_y: u32, size_z: u32) -> Self {
        let cells = size_x as usize * size_y as usize * size_z as usize;
        Self {
            voxels: vec![VoxelType::Air; cells],
            size_x,
            size_y,
            size_z,
        }
    }

    pub fn in_bounds(&self, coord: VoxelCoord) -> bool {
        let inside = |v: i32, size: u32| u32::try_from(v).is_ok_and(|v| v < size);
        inside(coord.x, self.size_x) && inside(coord.y, self.size_y) && inside(coord.z, self.size_z)
    }

    fn slot(&self, coord: VoxelCoord) -> Option<usize> {
        if !self.in_bounds(coord) {
            return None;
        }
        let (sx, sz) = (self.size_x as usize, self.size_z as usize);
        let slab = coord.y as usize * sx * sz;
        Some(slab + coord.z as usize * sx + coord.x as usize)
    }

    /// Voxel at `coord`; `Bedrock` outside the world.
    pub fn get(&self, coord: VoxelCoord) -> VoxelType {
        match self.slot(coord) {
            Some(i) => self.voxels[i],
            None => VoxelType::Bedrock,
        }
    }

    /// Overwrite the voxel at `coord`. Ignored outside the world.
    pub fn set(&mut self, coord: VoxelCoord, voxel: VoxelType) {
        if let Some(i) = self.slot(coord) {
            self.voxels[i] = voxel;
        }
    }

    /// Fill the inclusive box `min..=max` with `voxel`.
    pub fn fill(&mut self, min: VoxelCoord, max: VoxelCoord, voxel: VoxelType) {
        for y in min.y..=max.y {
            for z in min.z..=max.z {
                for x in min.x..=max.x {
                    self.set(VoxelCoord::new(x, y, z), voxel);
                }
            }
        }
    }

    /// Walk the cells on the segment `from -> to` and classify the solids.
    ///
    /// The cell containing `to` is never inspected, so a target pressed
    /// against a wall does not hide itself. The walk ends at the first
    /// unbreakable solid, at the destination cell, or once the segment is
    /// used up without entering it (a ray grazing a corner).
    pub fn line_obstruction(&self, from: Vec3, to: Vec3) -> LineObstruction {
        let span = to - from;
        let mut axes = [
            AxisWalk::new(from.x, span.x),
            AxisWalk::new(from.y, span.y),
            AxisWalk::new(from.z, span.z),
        ];
        let mut cell = VoxelCoord::containing(from);
        let end = VoxelCoord::containing(to);

        let mut seen = LineObstruction::default();
        while cell != end {
            let voxel = self.get(cell);
            if voxel.is_solid() {
                if !voxel.is_breakable() {
                    seen.unbreakable = true;
                    break;
                }
                seen.breakable += 1;
            }

            // Cross whichever boundary comes first; x wins ties, then y.
            let axis = (0..3).fold(0, |best, a| if axes[a].next < axes[best].next { a } else { best });
            let walk = &mut axes[axis];
            if walk.next > 1.0 {
                break;
            }
            match axis {
                0 => cell.x += walk.step,
                1 => cell.y += walk.step,
                _ => cell.z += walk.step,
            }
            walk.next += walk.delta;
        }
        seen
    }
}
