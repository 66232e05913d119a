use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::info;
use rayon::prelude::*;
use thread_local::ThreadLocal;

use crate::cells::{CellGrid, CellList, CellListPair};
use crate::{Error, Vector};

mod traverse;
use self::traverse::{PairScan, Scratch};

/// Combination of two partial outputs of a pairwise map. This is the default
/// reducer: addition for scalars and vectors, element-wise reduction for
/// containers. Non-additive reductions (a minimum, say) go through
/// [`map_pairwise_with`] instead.
pub trait Reduce {
    fn reduce(self, other: Self) -> Self;
}

impl Reduce for f64 {
    fn reduce(self, other: f64) -> f64 {
        self + other
    }
}

impl Reduce for f32 {
    fn reduce(self, other: f32) -> f32 {
        self + other
    }
}

impl Reduce for usize {
    fn reduce(self, other: usize) -> usize {
        self + other
    }
}

impl Reduce for u64 {
    fn reduce(self, other: u64) -> u64 {
        self + other
    }
}

impl<const N: usize> Reduce for Vector<N> {
    fn reduce(self, other: Vector<N>) -> Vector<N> {
        self + other
    }
}

impl<T: Reduce> Reduce for Vec<T> {
    fn reduce(self, other: Vec<T>) -> Vec<T> {
        debug_assert_eq!(self.len(), other.len());
        self.into_iter()
            .zip(other)
            .map(|(first, second)| first.reduce(second))
            .collect()
    }
}

impl<A: Reduce, B: Reduce> Reduce for (A, B) {
    fn reduce(self, other: (A, B)) -> (A, B) {
        (self.0.reduce(other.0), self.1.reduce(other.1))
    }
}

impl<A: Reduce, B: Reduce, C: Reduce> Reduce for (A, B, C) {
    fn reduce(self, other: (A, B, C)) -> (A, B, C) {
        (
            self.0.reduce(other.0),
            self.1.reduce(other.1),
            self.2.reduce(other.2),
        )
    }
}

/// Overall size of a traversal, controlling whether parallelism pays off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Tiny,
    Medium,
    Large,
}

/// Mean cell occupancy, controlling whether dense-cell projection pruning
/// pays off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    Sparse,
    Dense,
}

/// Inner-loop strategy selection, normally derived from the cell list by a
/// documented heuristic and overridable through [`MapOptions::workload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub scale: Scale,
    pub occupancy: Occupancy,
}

impl Workload {
    /// Classify a traversal: `Tiny` up to 1000 particles, `Medium` up to
    /// 100 000, `Large` beyond; `Dense` once the mean occupancy of non-empty
    /// cells reaches 8 records.
    pub fn classify(n_real: usize, n_entries: usize, n_occupied_cells: usize) -> Workload {
        let scale = if n_real <= 1_000 {
            Scale::Tiny
        } else if n_real <= 100_000 {
            Scale::Medium
        } else {
            Scale::Large
        };

        let mean_occupancy = n_entries as f64 / usize::max(n_occupied_cells, 1) as f64;
        let occupancy = if mean_occupancy >= 8.0 {
            Occupancy::Dense
        } else {
            Occupancy::Sparse
        };

        Workload {
            scale: scale,
            occupancy: occupancy,
        }
    }

    /// Should dense cross-cell pairs go through projection pruning?
    pub fn use_projection(&self) -> bool {
        self.occupancy == Occupancy::Dense
    }

    /// Is the traversal large enough for parallelism by default?
    pub fn parallel_by_default(&self) -> bool {
        self.scale != Scale::Tiny
    }
}

/// Batch configuration for the parallel driver: the work units are split in
/// `map * reduce` batches, distributed over `map` workers. Zero means "pick
/// from the thread pool size and the number of units".
#[derive(Debug, Clone, Copy, Default)]
pub struct Batches {
    pub map: usize,
    pub reduce: usize,
}

impl Batches {
    fn resolved(&self, units: usize) -> (usize, usize) {
        let map = if self.map == 0 {
            usize::clamp(units / 64, 1, rayon::current_num_threads())
        } else {
            usize::max(self.map, 1)
        };
        (usize::min(map, units), usize::max(self.reduce, 1))
    }
}

/// Options for [`map_pairwise`] and its variants.
#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Run the map over the rayon thread pool. Tiny workloads fall back to
    /// the serial path regardless.
    pub parallel: bool,
    /// Batching of the work units across workers
    pub nbatches: Batches,
    /// Log (at info level) after each finished batch
    pub show_progress: bool,
    /// Override the inner-loop strategy instead of deriving it from the cell
    /// list
    pub workload: Option<Workload>,
}

impl Default for MapOptions {
    fn default() -> MapOptions {
        MapOptions {
            parallel: true,
            nbatches: Batches::default(),
            show_progress: false,
            workload: None,
        }
    }
}

/// Map `f` over all pairs of particles in `list` closer than the grid
/// cutoff, reducing the per-worker outputs with [`Reduce`].
///
/// `f` receives the image-adjusted positions of the two particles (so that
/// `x - y` is the minimum-image displacement), their indices in the input,
/// and the squared distance; it returns the updated accumulator. Every
/// worker starts from a clone of `output`, so `output` should be the neutral
/// element of the reduction (zero, for sums).
///
/// ```
/// use cellmap::{map_pairwise, CellGrid, CellList, ListOptions, MapOptions, Vector};
///
/// let points = vec![Vector::new([1.0, 1.0, 1.0]), Vector::new([1.5, 1.0, 1.0])];
/// let grid = CellGrid::orthorhombic([10.0, 10.0, 10.0], 2.0)?;
/// let list = CellList::new(&points, &grid, &ListOptions::default())?;
///
/// let energy = map_pairwise(
///     |_x, _y, _i, _j, d2, energy: f64| energy + 1.0 / d2.sqrt(),
///     0.0,
///     &grid,
///     &list,
///     &MapOptions::default(),
/// )?;
/// assert!((energy - 2.0).abs() < 1e-12);
/// # Ok::<(), cellmap::Error>(())
/// ```
pub fn map_pairwise<const N: usize, O, F>(
    f: F,
    output: O,
    grid: &CellGrid<N>,
    list: &CellList<N>,
    options: &MapOptions,
) -> Result<O, Error>
where
    O: Reduce + Clone + Send,
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O + Send + Sync,
{
    run(f, output, Reduce::reduce, grid, list, options)
}

/// Same as [`map_pairwise`], with an explicit reducer. The reducer must be
/// associative; it is applied in worker-index order.
pub fn map_pairwise_with<const N: usize, O, F, R>(
    f: F,
    output: O,
    reduce: R,
    grid: &CellGrid<N>,
    list: &CellList<N>,
    options: &MapOptions,
) -> Result<O, Error>
where
    O: Clone + Send,
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O + Send + Sync,
    R: Fn(O, O) -> O + Sync,
{
    run(f, output, reduce, grid, list, options)
}

/// Map `f` over all pairs between the two sets of a [`CellListPair`] closer
/// than the grid cutoff. The callback always sees arguments in the user's
/// original `(x, y)` order, even when the sets were swapped internally.
pub fn map_pairwise_pair<const N: usize, O, F>(
    f: F,
    output: O,
    grid: &CellGrid<N>,
    pair: &CellListPair<N>,
    options: &MapOptions,
) -> Result<O, Error>
where
    O: Reduce + Clone + Send,
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O + Send + Sync,
{
    run(f, output, Reduce::reduce, grid, pair, options)
}

/// Same as [`map_pairwise_pair`], with an explicit reducer.
pub fn map_pairwise_pair_with<const N: usize, O, F, R>(
    f: F,
    output: O,
    reduce: R,
    grid: &CellGrid<N>,
    pair: &CellListPair<N>,
    options: &MapOptions,
) -> Result<O, Error>
where
    O: Clone + Send,
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O + Send + Sync,
    R: Fn(O, O) -> O + Sync,
{
    run(f, output, reduce, grid, pair, options)
}

#[time_graph::instrument(name = "map_pairwise")]
fn run<const N: usize, O, F, R, T>(
    f: F,
    output: O,
    reduce: R,
    grid: &CellGrid<N>,
    target: &T,
    options: &MapOptions,
) -> Result<O, Error>
where
    T: PairScan<N>,
    O: Clone + Send,
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O + Send + Sync,
    R: Fn(O, O) -> O + Sync,
{
    let units = target.units();
    if units == 0 {
        return Ok(output);
    }

    let workload = options.workload.unwrap_or_else(|| target.workload());
    let prune = workload.use_projection();
    let parallel =
        options.parallel && workload.parallel_by_default() && rayon::current_num_threads() > 1;

    if !parallel {
        let mut scratch = Scratch::new();
        return catch_unwind(AssertUnwindSafe(|| {
            target.scan(grid, &f, output, 0..units, prune, &mut scratch)
        }))
        .map_err(|payload| annotate(Error::from(payload), 0));
    }

    let (map_batches, reduce_batches) = options.nbatches.resolved(units);
    let total_batches = map_batches * reduce_batches;
    let finished = AtomicUsize::new(0);
    let scratches = ThreadLocal::new();

    // every worker starts from its own deep copy of the initial output
    let seeds: Vec<O> = std::iter::repeat_with(|| output.clone())
        .take(map_batches)
        .collect();

    let results: Vec<Result<O, Error>> = seeds
        .into_par_iter()
        .enumerate()
        .map(|(worker, seed)| {
            catch_unwind(AssertUnwindSafe(|| {
                let mut local = seed;
                let scratch = scratches.get_or(|| RefCell::new(Scratch::new()));
                let mut scratch = scratch.borrow_mut();

                let mut batch = worker;
                while batch < total_batches {
                    let start = batch * units / total_batches;
                    let end = (batch + 1) * units / total_batches;
                    local = target.scan(grid, &f, local, start..end, prune, &mut scratch);

                    if options.show_progress {
                        let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                        info!("pairwise map: {}/{} batches done", done, total_batches);
                    }
                    batch += map_batches;
                }
                local
            }))
            .map_err(|payload| annotate(Error::from(payload), worker))
        })
        .collect();

    // all workers have drained: reduce in worker-index order, reporting the
    // first fault if any
    let mut reduced: Option<O> = None;
    let mut first_error = None;
    for result in results {
        match result {
            Ok(local) => {
                reduced = Some(match reduced {
                    Some(acc) => reduce(acc, local),
                    None => local,
                });
            }
            Err(error) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(reduced.unwrap_or(output)),
    }
}

fn annotate(error: Error, worker: usize) -> Error {
    match error {
        Error::Aborted(message) => Error::Aborted(format!("worker {}: {}", worker, message)),
        other => other,
    }
}
