use itertools::Itertools;

use crate::points::limits;
use crate::{Error, SquareMatrix, Vector};

use super::UnitCell;

/// Options controlling the construction of a [`CellGrid`].
#[derive(Debug, Clone)]
pub struct GridOptions {
    /// Number of grid cells per cutoff length. Higher values give smaller
    /// cells (edge `cutoff/lcell`), lowering per-cell occupancy at the cost
    /// of a larger neighbor stencil.
    pub lcell: usize,
}

impl Default for GridOptions {
    fn default() -> GridOptions {
        GridOptions { lcell: 1 }
    }
}

/// Geometry of the cell grid used for neighbor searching: the unit cell
/// expanded by one cutoff on every side ("computing box"), subdivided in
/// cubic cells of edge `cutoff/lcell`.
///
/// The grid itself is not periodic: periodicity is handled by replicating
/// boundary particles into the expanded margin (ghosts), which keeps the
/// traversal inner loop free of wrapping arithmetic.
#[derive(Debug, Clone)]
pub struct CellGrid<const N: usize> {
    cell: UnitCell<N>,
    /// lower corner of the unit region in cartesian coordinates; zero for
    /// periodic cells, the lower coordinate limit for bounding boxes
    origin: Vector<N>,
    cutoff: f64,
    cutoff_sq: f64,
    lcell: usize,
    cell_size: f64,
    /// sum of the lattice vectors
    extent: Vector<N>,
    /// corners of the computing box
    computing_min: Vector<N>,
    computing_max: Vector<N>,
    /// number of grid cells along each axis
    nc: [usize; N],
    strides: [usize; N],
    total_cells: usize,
    /// per-axis range of periodic images intersecting the computing box
    image_ranges: [(i32, i32); N],
    /// non-zero image offsets, materialized once
    image_offsets: Vec<[i32; N]>,
    /// all neighbor offsets within `lcell + 1` steps, including zero
    full_stencil: Vec<[i32; N]>,
    /// antisymmetric half of the non-zero stencil offsets
    forward_stencil: Vec<[i32; N]>,
}

/// An offset is "forward" when its first non-zero component is positive;
/// exactly one of `o` and `-o` is forward for any non-zero `o`, so scanning
/// only forward neighbors visits every unordered cell pair once.
fn is_forward<const N: usize>(offset: &[i32; N]) -> bool {
    for &component in offset {
        if component != 0 {
            return component > 0;
        }
    }
    false
}

impl<const N: usize> CellGrid<N> {
    /// Create a grid for the given unit cell and cutoff, with default
    /// options.
    pub fn new(cell: UnitCell<N>, cutoff: f64) -> Result<CellGrid<N>, Error> {
        CellGrid::with_options(cell, cutoff, &GridOptions::default())
    }

    /// Create a grid for the given unit cell and cutoff.
    pub fn with_options(
        cell: UnitCell<N>,
        cutoff: f64,
        options: &GridOptions,
    ) -> Result<CellGrid<N>, Error> {
        CellGrid::build(cell, Vector::zero(), cutoff, options)
    }

    /// Shortcut for an orthorhombic periodic grid with the given side
    /// lengths.
    pub fn orthorhombic(sides: [f64; N], cutoff: f64) -> Result<CellGrid<N>, Error> {
        CellGrid::new(UnitCell::orthorhombic(sides)?, cutoff)
    }

    /// Shortcut for a triclinic periodic grid; each row of `matrix` is one
    /// lattice vector.
    pub fn triclinic(matrix: [[f64; N]; N], cutoff: f64) -> Result<CellGrid<N>, Error> {
        CellGrid::new(UnitCell::from_matrix(SquareMatrix::new(matrix))?, cutoff)
    }

    /// Create a non-periodic grid from the bounding limits of `points`.
    pub fn non_periodic(points: &[Vector<N>], cutoff: f64) -> Result<CellGrid<N>, Error> {
        let (min, max) = limits(points).ok_or_else(|| {
            Error::InvalidBox("can not derive coordinate limits from an empty set".into())
        })?;
        CellGrid::build(
            UnitCell::bounding(min, max)?,
            min,
            cutoff,
            &GridOptions::default(),
        )
    }

    /// Create a non-periodic grid covering the bounding limits of both sets
    /// of points.
    pub fn non_periodic_pair(
        x: &[Vector<N>],
        y: &[Vector<N>],
        cutoff: f64,
    ) -> Result<CellGrid<N>, Error> {
        let limits_x = limits(x);
        let limits_y = limits(y);
        let (min, max) = match (limits_x, limits_y) {
            (Some((min_x, max_x)), Some((min_y, max_y))) => {
                (min_x.min(min_y), max_x.max(max_y))
            }
            (Some(limits), None) | (None, Some(limits)) => limits,
            (None, None) => {
                return Err(Error::InvalidBox(
                    "can not derive coordinate limits from empty sets".into(),
                ));
            }
        };
        CellGrid::build(
            UnitCell::bounding(min, max)?,
            min,
            cutoff,
            &GridOptions::default(),
        )
    }

    fn build(
        cell: UnitCell<N>,
        origin: Vector<N>,
        cutoff: f64,
        options: &GridOptions,
    ) -> Result<CellGrid<N>, Error> {
        if !(cutoff > 0.0) {
            return Err(Error::InvalidCutoff(format!(
                "cutoff must be positive, got {}", cutoff
            )));
        }
        if options.lcell < 1 {
            return Err(Error::InvalidBox("lcell must be at least 1".into()));
        }

        if cell.is_periodic() {
            let min_distance = cell.distances_between_faces().min_component();
            if 2.0 * cutoff > min_distance {
                return Err(Error::InvalidCutoff(format!(
                    "cutoff {} is too large: wrapping is ambiguous beyond half \
                     the smallest distance between cell faces ({})",
                    cutoff, min_distance
                )));
            }
        }

        let cell_size = cutoff / options.lcell as f64;
        let extent = cell.extent();
        let computing_min = origin - Vector::splat(cutoff);
        let computing_max = origin + extent + Vector::splat(cutoff);

        let mut nc = [0; N];
        for i in 0..N {
            nc[i] = f64::ceil(f64::max(1.0, (extent[i] + 2.0 * cutoff) / cell_size)) as usize;
        }

        let mut strides = [0; N];
        let mut total_cells = 1;
        for i in 0..N {
            strides[i] = total_cells;
            total_cells *= nc[i];
        }

        let image_ranges = if cell.is_periodic() {
            image_ranges_of(&cell, origin, computing_min, computing_max)
        } else {
            [(0, 0); N]
        };

        let image_offsets = image_ranges
            .iter()
            .map(|&(first, last)| first..=last)
            .multi_cartesian_product()
            .filter_map(|combo| {
                let mut offset = [0; N];
                for (slot, value) in offset.iter_mut().zip(&combo) {
                    *slot = *value;
                }
                if offset.iter().all(|&r| r == 0) {
                    None
                } else {
                    Some(offset)
                }
            })
            .collect();

        let reach = options.lcell as i32 + 1;
        let mut full_stencil = Vec::new();
        let mut forward_stencil = Vec::new();
        for combo in std::iter::repeat(-reach..=reach)
            .take(N)
            .multi_cartesian_product()
        {
            let mut offset = [0; N];
            for (slot, value) in offset.iter_mut().zip(&combo) {
                *slot = *value;
            }
            full_stencil.push(offset);
            if is_forward(&offset) {
                forward_stencil.push(offset);
            }
        }

        Ok(CellGrid {
            cell: cell,
            origin: origin,
            cutoff: cutoff,
            cutoff_sq: cutoff * cutoff,
            lcell: options.lcell,
            cell_size: cell_size,
            extent: extent,
            computing_min: computing_min,
            computing_max: computing_max,
            nc: nc,
            strides: strides,
            total_cells: total_cells,
            image_ranges: image_ranges,
            image_offsets: image_offsets,
            full_stencil: full_stencil,
            forward_stencil: forward_stencil,
        })
    }

    /// Get the unit cell of this grid
    pub fn cell(&self) -> &UnitCell<N> {
        &self.cell
    }

    /// Get the cutoff distance
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Get the squared cutoff distance
    pub fn cutoff_sq(&self) -> f64 {
        self.cutoff_sq
    }

    /// Get the grid subdivision factor
    pub fn lcell(&self) -> usize {
        self.lcell
    }

    /// Get the edge length of a single grid cell
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Get the number of cells along each axis
    pub fn nc(&self) -> [usize; N] {
        self.nc
    }

    /// Get the total number of cells in the grid
    pub fn total_cells(&self) -> usize {
        self.total_cells
    }

    /// Sum of the lattice vectors, i.e. the far corner of the unit cell
    /// relative to its origin
    pub fn extent(&self) -> Vector<N> {
        self.extent
    }

    /// Get the per-axis ranges of periodic images intersecting the computing
    /// box
    pub fn image_ranges(&self) -> [(i32, i32); N] {
        self.image_ranges
    }

    pub(crate) fn image_offsets(&self) -> &[[i32; N]] {
        &self.image_offsets
    }

    pub(crate) fn forward_stencil(&self) -> &[[i32; N]] {
        &self.forward_stencil
    }

    pub(crate) fn full_stencil(&self) -> &[[i32; N]] {
        &self.full_stencil
    }

    /// Wrap a point into the primary unit cell (identity for non-periodic
    /// grids).
    #[inline]
    pub fn wrap(&self, point: Vector<N>) -> Vector<N> {
        if self.cell.is_periodic() {
            self.cell.wrap(point - self.origin) + self.origin
        } else {
            point
        }
    }

    /// Check whether a point lies inside the computing box, i.e. within one
    /// cutoff of the unit cell.
    #[inline]
    pub(crate) fn in_computing_box(&self, point: Vector<N>) -> bool {
        for i in 0..N {
            if point[i] < self.computing_min[i] || point[i] > self.computing_max[i] {
                return false;
            }
        }
        true
    }

    /// Grid cell of a (wrapped) point. The origin cell covers
    /// `[-cutoff, -cutoff + cell_size)` on each axis; out-of-grid points are
    /// clamped into the closest boundary cell.
    #[inline]
    pub fn cell_of(&self, point: Vector<N>) -> [usize; N] {
        let mut index = [0; N];
        for i in 0..N {
            let cell = f64::floor((point[i] - self.computing_min[i]) / self.cell_size) as isize;
            index[i] = cell.clamp(0, self.nc[i] as isize - 1) as usize;
        }
        index
    }

    /// Linear index of a cartesian cell index
    #[inline]
    pub fn linear_index(&self, cartesian: &[usize; N]) -> usize {
        let mut linear = 0;
        for i in 0..N {
            linear += cartesian[i] * self.strides[i];
        }
        linear
    }

    /// Cartesian cell index of a linear index
    #[inline]
    pub fn cartesian_index(&self, linear: usize) -> [usize; N] {
        let mut remainder = linear;
        let mut cartesian = [0; N];
        for i in (0..N).rev() {
            cartesian[i] = remainder / self.strides[i];
            remainder %= self.strides[i];
        }
        cartesian
    }

    /// Center of the cell at the given cartesian index
    #[inline]
    pub fn cell_center(&self, cartesian: &[usize; N]) -> Vector<N> {
        let mut center = self.computing_min;
        for i in 0..N {
            center[i] += (cartesian[i] as f64 + 0.5) * self.cell_size;
        }
        center
    }

    /// Apply a stencil offset to a cartesian cell index, or `None` when the
    /// neighbor falls outside the grid.
    #[inline]
    pub(crate) fn offset_cell(
        &self,
        cartesian: &[usize; N],
        offset: &[i32; N],
    ) -> Option<[usize; N]> {
        let mut neighbor = [0; N];
        for i in 0..N {
            let index = cartesian[i] as isize + offset[i] as isize;
            if index < 0 || index >= self.nc[i] as isize {
                return None;
            }
            neighbor[i] = index as usize;
        }
        Some(neighbor)
    }

    /// Translation of the periodic image identified by integer coefficients
    #[inline]
    pub(crate) fn image_translation(&self, image: &[i32; N]) -> Vector<N> {
        self.cell.image_translation(image)
    }
}

/// Per-axis range of periodic images whose translated unit cell intersects
/// the computing box, from the fractional coordinates of the box vertices:
/// image `r` intersects iff `r ≤ max f` and `r + 1 ≥ min f` on every axis.
fn image_ranges_of<const N: usize>(
    cell: &UnitCell<N>,
    origin: Vector<N>,
    computing_min: Vector<N>,
    computing_max: Vector<N>,
) -> [(i32, i32); N] {
    let mut min_fractional = Vector::splat(f64::INFINITY);
    let mut max_fractional = Vector::splat(f64::NEG_INFINITY);

    for vertex in 0..(1_u32 << N) {
        let mut corner = Vector::zero();
        for i in 0..N {
            corner[i] = if vertex & (1 << i) == 0 {
                computing_min[i]
            } else {
                computing_max[i]
            };
        }
        let fractional = cell.fractional(corner - origin);
        min_fractional = min_fractional.min(fractional);
        max_fractional = max_fractional.max(fractional);
    }

    let mut ranges = [(0, 0); N];
    for i in 0..N {
        ranges[i] = (
            f64::ceil(min_fractional[i] - 1.0) as i32,
            f64::floor(max_fractional[i]) as i32,
        );
    }
    ranges
}
