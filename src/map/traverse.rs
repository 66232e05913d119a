use std::ops::Range;

use log::warn;

use crate::cells::{CellGrid, CellList, CellListPair, GridCell};
use crate::Vector;

use super::Workload;

/// Cross-cell pairs are routed through projection pruning once the two
/// chains together hold at least this many records.
const PROJECTION_THRESHOLD: usize = 24;

/// A particle copied out of a chain for dense-cell traversal, annotated with
/// its projection on the axis between the two cell centers.
#[derive(Debug, Clone, Copy)]
struct ProjectedParticle<const N: usize> {
    original: usize,
    real: bool,
    x_proj: f64,
    position: Vector<N>,
}

/// Per-worker scratch buffers for projection pruning. Traversal never
/// mutates the cell list itself, so every worker gets its own scratch.
pub(crate) struct Scratch<const N: usize> {
    first: Vec<ProjectedParticle<N>>,
    second: Vec<ProjectedParticle<N>>,
}

impl<const N: usize> Scratch<N> {
    pub(crate) fn new() -> Scratch<N> {
        Scratch {
            first: Vec::new(),
            second: Vec::new(),
        }
    }
}

/// Evaluate one candidate pair, applying the deduplication rules:
///
/// - a particle never pairs with one of its own images;
/// - ghost-ghost pairs are translated copies of a pair counted elsewhere;
/// - a real-ghost pair exists in two orientations inside the computing box
///   (which endpoint is the real one); only the orientation with
///   `real.original < ghost.original` is counted.
#[inline]
#[allow(clippy::too_many_arguments)]
fn visit<const N: usize, O, F>(
    cutoff_sq: f64,
    x: Vector<N>,
    i: usize,
    i_real: bool,
    y: Vector<N>,
    j: usize,
    j_real: bool,
    f: &F,
    output: O,
) -> O
where
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O,
{
    if i == j {
        return output;
    }
    match (i_real, j_real) {
        (false, false) => return output,
        (true, false) if i > j => return output,
        (false, true) if j > i => return output,
        _ => {}
    }

    let d2 = (x - y).norm2();
    if d2 > cutoff_sq {
        return output;
    }
    if d2 < 1e-6 {
        warn!(
            "particles {} and {} are very close to one another ({})",
            i,
            j,
            d2.sqrt()
        );
    }
    f(x, y, i, j, d2, output)
}

/// Unordered pairs within a single chain.
fn same_cell<const N: usize, O, F>(
    list: &CellList<N>,
    linear: usize,
    cutoff_sq: f64,
    f: &F,
    mut output: O,
) -> O
where
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O,
{
    let mut chain = list.chain(linear);
    while let Some(u) = chain.next() {
        for v in chain.clone() {
            output = visit(
                cutoff_sq, u.position, u.original, u.real, v.position, v.original, v.real, f,
                output,
            );
        }
    }
    output
}

/// All pairs between two distinct chains.
fn cross_cells<const N: usize, O, F>(
    list: &CellList<N>,
    first: usize,
    second: usize,
    cutoff_sq: f64,
    f: &F,
    mut output: O,
) -> O
where
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O,
{
    for u in list.chain(first) {
        for v in list.chain(second) {
            output = visit(
                cutoff_sq, u.position, u.original, u.real, v.position, v.original, v.real, f,
                output,
            );
        }
    }
    output
}

/// All pairs between two distinct dense chains, pruned by projection on the
/// axis between the cell centers: after sorting both sides along that axis,
/// only windows with `|Δx_proj| ≤ cutoff` can contain pairs within cutoff.
#[allow(clippy::too_many_arguments)]
fn cross_cells_projected<const N: usize, O, F>(
    list: &CellList<N>,
    cell: &GridCell<N>,
    neighbor_linear: usize,
    neighbor_center: Vector<N>,
    cutoff: f64,
    cutoff_sq: f64,
    f: &F,
    mut output: O,
    scratch: &mut Scratch<N>,
) -> O
where
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O,
{
    let axis = (neighbor_center - cell.center).normalized();

    scratch.first.clear();
    for record in list.chain(cell.linear) {
        scratch.first.push(ProjectedParticle {
            original: record.original,
            real: record.real,
            x_proj: axis * record.position,
            position: record.position,
        });
    }

    scratch.second.clear();
    for record in list.chain(neighbor_linear) {
        scratch.second.push(ProjectedParticle {
            original: record.original,
            real: record.real,
            x_proj: axis * record.position,
            position: record.position,
        });
    }

    scratch.first.sort_unstable_by(|a, b| a.x_proj.total_cmp(&b.x_proj));
    scratch.second.sort_unstable_by(|a, b| a.x_proj.total_cmp(&b.x_proj));

    let mut window = 0;
    for u in &scratch.first {
        while window < scratch.second.len()
            && scratch.second[window].x_proj < u.x_proj - cutoff
        {
            window += 1;
        }
        for v in &scratch.second[window..] {
            if v.x_proj > u.x_proj + cutoff {
                break;
            }
            output = visit(
                cutoff_sq, u.position, u.original, u.real, v.position, v.original, v.real, f,
                output,
            );
        }
    }
    output
}

/// Single-set traversal of a range of the non-empty cells: each cell against
/// itself, then against its forward neighbors, so every unordered cell pair
/// is seen exactly once.
fn scan_cells<const N: usize, O, F>(
    grid: &CellGrid<N>,
    list: &CellList<N>,
    f: &F,
    mut output: O,
    range: Range<usize>,
    prune: bool,
    scratch: &mut Scratch<N>,
) -> O
where
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O,
{
    let cutoff = grid.cutoff();
    let cutoff_sq = grid.cutoff_sq();

    for cell in &list.cells()[range] {
        output = same_cell(list, cell.linear, cutoff_sq, f, output);

        let occupancy = list.occupancy(cell.linear);
        for offset in grid.forward_stencil() {
            let neighbor = match grid.offset_cell(&cell.cartesian, offset) {
                Some(neighbor) => neighbor,
                None => continue,
            };
            let neighbor_linear = grid.linear_index(&neighbor);
            let neighbor_occupancy = list.occupancy(neighbor_linear);
            if neighbor_occupancy == 0 {
                continue;
            }

            if prune && occupancy + neighbor_occupancy >= PROJECTION_THRESHOLD {
                let neighbor_center = grid.cell_center(&neighbor);
                output = cross_cells_projected(
                    list, cell, neighbor_linear, neighbor_center, cutoff, cutoff_sq, f, output,
                    scratch,
                );
            } else {
                output = cross_cells(list, cell.linear, neighbor_linear, cutoff_sq, f, output);
            }
        }
    }
    output
}

/// Two-set traversal of a range of the reference points: every point is
/// tested against the full stencil around its cell in the hashed set. The
/// reference set is never replicated, so each pair is seen exactly once and
/// ghosts of the hashed set participate unconditionally.
fn scan_reference_points<const N: usize, O, F>(
    grid: &CellGrid<N>,
    pair: &CellListPair<N>,
    f: &F,
    mut output: O,
    range: Range<usize>,
) -> O
where
    F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O,
{
    let cutoff_sq = grid.cutoff_sq();
    let list = pair.list();
    let swap = pair.swapped();

    let start = range.start;
    for (offset_index, point) in pair.reference()[range].iter().enumerate() {
        let index = start + offset_index;
        let wrapped = grid.wrap(*point);
        let cartesian = grid.cell_of(wrapped);

        for offset in grid.full_stencil() {
            let neighbor = match grid.offset_cell(&cartesian, offset) {
                Some(neighbor) => neighbor,
                None => continue,
            };
            let linear = grid.linear_index(&neighbor);
            if list.occupancy(linear) == 0 {
                continue;
            }

            for record in list.chain(linear) {
                let d2 = (wrapped - record.position).norm2();
                if d2 > cutoff_sq {
                    continue;
                }
                output = if swap {
                    f(record.position, wrapped, record.original, index, d2, output)
                } else {
                    f(wrapped, record.position, index, record.original, d2, output)
                };
            }
        }
    }
    output
}

/// A traversal target for the pairwise map driver: either a single-set cell
/// list or a two-set pair of lists. Work is split over `units` (non-empty
/// cells, or reference points).
pub(crate) trait PairScan<const N: usize>: Sync {
    fn units(&self) -> usize;

    fn workload(&self) -> Workload;

    fn scan<O, F>(
        &self,
        grid: &CellGrid<N>,
        f: &F,
        output: O,
        range: Range<usize>,
        prune: bool,
        scratch: &mut Scratch<N>,
    ) -> O
    where
        F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O;
}

impl<const N: usize> PairScan<N> for CellList<N> {
    fn units(&self) -> usize {
        self.n_occupied_cells()
    }

    fn workload(&self) -> Workload {
        Workload::classify(self.n_real(), self.n_entries(), self.n_occupied_cells())
    }

    fn scan<O, F>(
        &self,
        grid: &CellGrid<N>,
        f: &F,
        output: O,
        range: Range<usize>,
        prune: bool,
        scratch: &mut Scratch<N>,
    ) -> O
    where
        F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O,
    {
        scan_cells(grid, self, f, output, range, prune, scratch)
    }
}

impl<const N: usize> PairScan<N> for CellListPair<N> {
    fn units(&self) -> usize {
        self.reference().len()
    }

    fn workload(&self) -> Workload {
        let list = self.list();
        Workload::classify(
            list.n_real() + self.reference().len(),
            list.n_entries(),
            list.n_occupied_cells(),
        )
    }

    fn scan<O, F>(
        &self,
        grid: &CellGrid<N>,
        f: &F,
        output: O,
        range: Range<usize>,
        _prune: bool,
        _scratch: &mut Scratch<N>,
    ) -> O
    where
        F: Fn(Vector<N>, Vector<N>, usize, usize, f64, O) -> O,
    {
        scan_reference_points(grid, self, f, output, range)
    }
}
