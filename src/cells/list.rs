use rayon::prelude::*;

use crate::{Error, Vector};

use super::CellGrid;

/// A single particle entry in the cell list. Ghost copies (periodic images
/// replicated into the computing-box margin) share the `original` index of
/// the particle they are a copy of, with `real` set to false.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParticleRecord<const N: usize> {
    /// 1-based storage slot; 0 is the chain-end sentinel
    pub(crate) index: usize,
    /// index of the particle in the user's input
    pub(crate) original: usize,
    /// false for ghost image copies
    pub(crate) real: bool,
    pub(crate) position: Vector<N>,
}

impl<const N: usize> ParticleRecord<N> {
    fn null() -> ParticleRecord<N> {
        ParticleRecord {
            index: 0,
            original: 0,
            real: false,
            position: Vector::zero(),
        }
    }

    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.index == 0
    }
}

/// A non-empty grid cell, as registered in the compact cell list.
#[derive(Debug, Clone, Copy)]
pub struct GridCell<const N: usize> {
    /// linear index in the grid
    pub linear: usize,
    /// cartesian index in the grid
    pub cartesian: [usize; N],
    /// center of the cell in cartesian coordinates
    pub center: Vector<N>,
}

/// Options controlling the construction of a [`CellList`].
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Fill the list in parallel (one partial list per worker, merged
    /// cell-by-cell)
    pub parallel: bool,
    /// Number of particle partitions for the parallel fill; 0 picks a value
    /// from the particle count and the thread pool size
    pub nbatches: usize,
}

impl Default for ListOptions {
    fn default() -> ListOptions {
        ListOptions {
            parallel: true,
            nbatches: 0,
        }
    }
}

/// Spatial hash of particle positions over a [`CellGrid`].
///
/// Particles are wrapped into the unit cell and stored in singly-linked
/// chains, one chain per grid cell; boundary particles are additionally
/// replicated as ghosts wherever one of their periodic images falls inside
/// the computing box. Non-empty cells are registered in a compact list so
/// traversal never scans the full grid.
#[derive(Debug, Clone)]
pub struct CellList<const N: usize> {
    /// compact list of cells with particles
    cwp: Vec<GridCell<N>>,
    /// head of the particle chain for every cell of the grid
    fp: Vec<ParticleRecord<N>>,
    /// `np[slot]` is the record following `slot` in its chain
    np: Vec<ParticleRecord<N>>,
    /// number of particles in every cell of the grid
    npcell: Vec<usize>,
    /// number of stored records, ghosts included
    ncp: usize,
    /// number of real (input) particles
    n_real: usize,
}

impl<const N: usize> CellList<N> {
    /// Build a cell list for `points` over `grid`.
    #[time_graph::instrument(name = "CellList::new")]
    pub fn new(
        points: &[Vector<N>],
        grid: &CellGrid<N>,
        options: &ListOptions,
    ) -> Result<CellList<N>, Error> {
        let mut list = CellList::with_capacity(grid, points.len())?;
        let workers = resolve_workers(options, points.len());
        if workers > 1 {
            let mut aux = BuildAux::new(grid, workers)?;
            list.fill_with_aux(points, grid, &mut aux)?;
        } else {
            list.fill_serial(points, grid);
        }
        Ok(list)
    }

    fn with_capacity(grid: &CellGrid<N>, n_points: usize) -> Result<CellList<N>, Error> {
        let mut list = CellList {
            cwp: Vec::new(),
            fp: Vec::new(),
            np: vec![ParticleRecord::null()],
            npcell: Vec::new(),
            ncp: 0,
            n_real: 0,
        };
        list.ensure_capacity(grid, n_points)?;
        Ok(list)
    }

    /// Grow the grid-sized and particle-sized buffers as needed; refreshing
    /// with a compatible grid never reallocates.
    fn ensure_capacity(&mut self, grid: &CellGrid<N>, n_points: usize) -> Result<(), Error> {
        let total = grid.total_cells();
        if self.fp.len() < total {
            self.fp.try_reserve(total - self.fp.len())?;
            self.npcell.try_reserve(total - self.npcell.len())?;
            self.fp.resize(total, ParticleRecord::null());
            self.npcell.resize(total, 0);
        }
        if self.np.len() < n_points + 1 {
            self.np.try_reserve(n_points + 1 - self.np.len())?;
        }
        Ok(())
    }

    /// Empty the list, touching only the previously occupied cells.
    fn reset(&mut self) {
        for cell in self.cwp.drain(..) {
            self.fp[cell.linear] = ParticleRecord::null();
            self.npcell[cell.linear] = 0;
        }
        self.ncp = 0;
        self.n_real = 0;
    }

    /// Refresh this list in place from new positions, possibly over a
    /// different grid. Equivalent to a fresh build, but reuses every buffer
    /// whose capacity suffices.
    #[time_graph::instrument(name = "CellList::update")]
    pub fn update(&mut self, points: &[Vector<N>], grid: &CellGrid<N>) -> Result<(), Error> {
        self.ensure_capacity(grid, points.len())?;
        self.reset();
        self.fill_serial(points, grid);
        Ok(())
    }

    /// Same as [`CellList::update`], filling in parallel with the per-worker
    /// partial lists from `aux`.
    #[time_graph::instrument(name = "CellList::update_with_aux")]
    pub fn update_with_aux(
        &mut self,
        points: &[Vector<N>],
        grid: &CellGrid<N>,
        aux: &mut BuildAux<N>,
    ) -> Result<(), Error> {
        self.ensure_capacity(grid, points.len())?;
        self.reset();
        self.fill_with_aux(points, grid, aux)
    }

    fn fill_serial(&mut self, points: &[Vector<N>], grid: &CellGrid<N>) {
        for (original, point) in points.iter().enumerate() {
            self.insert(original, *point, grid);
        }
    }

    fn fill_with_aux(
        &mut self,
        points: &[Vector<N>],
        grid: &CellGrid<N>,
        aux: &mut BuildAux<N>,
    ) -> Result<(), Error> {
        if aux.lists.is_empty() || points.len() <= aux.lists.len() {
            self.fill_serial(points, grid);
            return Ok(());
        }

        let chunk_size = (points.len() + aux.lists.len() - 1) / aux.lists.len();
        for list in &mut aux.lists {
            list.ensure_capacity(grid, chunk_size)?;
            list.reset();
        }

        aux.lists
            .par_iter_mut()
            .enumerate()
            .for_each(|(worker, list)| {
                let start = worker * chunk_size;
                let end = usize::min(start + chunk_size, points.len());
                for (offset, point) in points[start..end].iter().enumerate() {
                    list.insert(start + offset, *point, grid);
                }
            });

        // merge the partial lists cell by cell; the order of records inside a
        // chain is not part of the interface
        for partial in &aux.lists {
            for cell in &partial.cwp {
                for record in partial.chain(cell.linear) {
                    self.push(grid, record.position, record.original, record.real);
                }
            }
            self.n_real += partial.n_real;
        }
        Ok(())
    }

    /// Insert one input particle: its wrapped position, plus a ghost copy
    /// for every periodic image falling inside the computing box.
    fn insert(&mut self, original: usize, point: Vector<N>, grid: &CellGrid<N>) {
        let wrapped = grid.wrap(point);
        self.push(grid, wrapped, original, true);

        for offset in grid.image_offsets() {
            debug_assert!(offset.iter().any(|&r| r != 0));
            let image = wrapped + grid.image_translation(offset);
            if grid.in_computing_box(image) {
                self.push(grid, image, original, false);
            }
        }
        self.n_real += 1;
    }

    fn push(&mut self, grid: &CellGrid<N>, position: Vector<N>, original: usize, real: bool) {
        let cartesian = grid.cell_of(position);
        let linear = grid.linear_index(&cartesian);

        let slot = self.ncp + 1;
        let head = self.fp[linear];
        if slot < self.np.len() {
            self.np[slot] = head;
        } else {
            self.np.push(head);
        }

        self.fp[linear] = ParticleRecord {
            index: slot,
            original: original,
            real: real,
            position: position,
        };

        if self.npcell[linear] == 0 {
            self.cwp.push(GridCell {
                linear: linear,
                cartesian: cartesian,
                center: grid.cell_center(&cartesian),
            });
        }
        self.npcell[linear] += 1;
        self.ncp += 1;
    }

    /// Number of cells containing at least one particle
    pub fn n_occupied_cells(&self) -> usize {
        self.cwp.len()
    }

    /// Number of stored records, ghost copies included
    pub fn n_entries(&self) -> usize {
        self.ncp
    }

    /// Number of real (input) particles
    pub fn n_real(&self) -> usize {
        self.n_real
    }

    pub(crate) fn cells(&self) -> &[GridCell<N>] {
        &self.cwp
    }

    #[inline]
    pub(crate) fn occupancy(&self, linear: usize) -> usize {
        self.npcell[linear]
    }

    /// Iterate the particle chain of a cell
    #[inline]
    pub(crate) fn chain(&self, linear: usize) -> ChainIter<'_, N> {
        ChainIter {
            list: self,
            current: self.fp[linear],
        }
    }
}

#[derive(Clone)]
pub(crate) struct ChainIter<'a, const N: usize> {
    list: &'a CellList<N>,
    current: ParticleRecord<N>,
}

impl<'a, const N: usize> Iterator for ChainIter<'a, N> {
    type Item = ParticleRecord<N>;

    #[inline]
    fn next(&mut self) -> Option<ParticleRecord<N>> {
        if self.current.is_null() {
            return None;
        }
        let record = self.current;
        self.current = self.list.np[record.index];
        Some(record)
    }
}

fn resolve_workers(options: &ListOptions, n_points: usize) -> usize {
    if !options.parallel {
        return 1;
    }
    if options.nbatches > 0 {
        return options.nbatches;
    }
    usize::min(rayon::current_num_threads(), usize::max(1, n_points / 5000))
}

/// Reusable per-worker partial cell lists for parallel fills, so repeated
/// [`CellList::update_with_aux`] calls do not reallocate grid-sized buffers.
#[derive(Debug)]
pub struct BuildAux<const N: usize> {
    lists: Vec<CellList<N>>,
}

impl<const N: usize> BuildAux<N> {
    pub fn new(grid: &CellGrid<N>, n_workers: usize) -> Result<BuildAux<N>, Error> {
        let mut lists = Vec::with_capacity(n_workers);
        for _ in 0..n_workers {
            lists.push(CellList::with_capacity(grid, 0)?);
        }
        Ok(BuildAux { lists: lists })
    }

    pub fn n_workers(&self) -> usize {
        self.lists.len()
    }
}

/// Cell list over two disjoint sets of points: the smaller set is kept as a
/// flat array and drives the traversal, the larger set is hashed.
#[derive(Debug, Clone)]
pub struct CellListPair<const N: usize> {
    /// the smaller set, in the user's coordinates and order
    reference: Vec<Vector<N>>,
    /// cell list over the larger set
    list: CellList<N>,
    /// true when the user's `(x, y)` ordering was reversed to make `y` the
    /// hashed set; restored when invoking the callback
    swap: bool,
}

impl<const N: usize> CellListPair<N> {
    /// Build a two-set cell list for `x` against `y` over `grid`.
    pub fn new(
        x: &[Vector<N>],
        y: &[Vector<N>],
        grid: &CellGrid<N>,
        options: &ListOptions,
    ) -> Result<CellListPair<N>, Error> {
        let swap = x.len() > y.len();
        let (reference, hashed) = if swap { (y, x) } else { (x, y) };
        Ok(CellListPair {
            reference: reference.to_vec(),
            list: CellList::new(hashed, grid, options)?,
            swap: swap,
        })
    }

    /// Refresh in place from new positions, possibly over a different grid.
    pub fn update(
        &mut self,
        x: &[Vector<N>],
        y: &[Vector<N>],
        grid: &CellGrid<N>,
    ) -> Result<(), Error> {
        self.swap = x.len() > y.len();
        let (reference, hashed) = if self.swap { (y, x) } else { (x, y) };
        self.reference.clear();
        self.reference.extend_from_slice(reference);
        self.list.update(hashed, grid)
    }

    /// Was the user's `(x, y)` ordering reversed internally?
    pub fn swapped(&self) -> bool {
        self.swap
    }

    pub(crate) fn reference(&self) -> &[Vector<N>] {
        &self.reference
    }

    pub(crate) fn list(&self) -> &CellList<N> {
        &self.list
    }
}
