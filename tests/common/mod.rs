//! Shared helpers for the integration tests: brute-force O(n²) references
//! using minimum-image arithmetic, and pair-set collection through the
//! pairwise map.

#![allow(dead_code)]

use cellmap::{
    map_pairwise_pair_with, map_pairwise_with, CellGrid, CellList, CellListPair, MapOptions,
    Occupancy, Scale, UnitCell, Vector, Workload,
};

use rand::rngs::StdRng;
use rand::Rng;

/// `(i, j, d²)` with `i < j` for single-set pairs, user ordering for two-set
/// pairs.
pub type PairSet = Vec<(usize, usize, f64)>;

/// All `[-1, 0, 1]` offset combinations in `N` dimensions.
fn unit_offsets<const N: usize>() -> Vec<[i32; N]> {
    let mut offsets = vec![[0_i32; N]];
    for axis in 0..N {
        let mut extended = Vec::with_capacity(offsets.len() * 3);
        for base in offsets {
            for shift in -1..=1 {
                let mut offset = base;
                offset[axis] = shift;
                extended.push(offset);
            }
        }
        offsets = extended;
    }
    offsets
}

/// Minimum-image displacement `y - x` in the given cell. With the cutoff
/// restricted to half the smallest face distance, scanning the adjacent
/// images of the wrapped difference is exact for every pair within cutoff.
pub fn min_image_displacement<const N: usize>(
    cell: &UnitCell<N>,
    x: Vector<N>,
    y: Vector<N>,
) -> Vector<N> {
    let delta = cell.wrap(y) - cell.wrap(x);
    let mut best = delta;
    let mut best_norm2 = delta.norm2();
    for offset in unit_offsets::<N>() {
        let image = delta + cell.image_translation(&offset);
        let norm2 = image.norm2();
        if norm2 < best_norm2 {
            best = image;
            best_norm2 = norm2;
        }
    }
    best
}

/// Brute-force reference for single-set traversal.
pub fn naive_pairs<const N: usize>(
    points: &[Vector<N>],
    cell: Option<&UnitCell<N>>,
    cutoff: f64,
) -> PairSet {
    let cutoff_sq = cutoff * cutoff;
    let mut pairs = Vec::new();
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let displacement = match cell {
                Some(cell) => min_image_displacement(cell, points[i], points[j]),
                None => points[j] - points[i],
            };
            let d2 = displacement.norm2();
            if d2 <= cutoff_sq {
                pairs.push((i, j, d2));
            }
        }
    }
    sort_pairs(&mut pairs);
    pairs
}

/// Brute-force reference for two-set traversal.
pub fn naive_pairs_two_sets<const N: usize>(
    x: &[Vector<N>],
    y: &[Vector<N>],
    cell: Option<&UnitCell<N>>,
    cutoff: f64,
) -> PairSet {
    let cutoff_sq = cutoff * cutoff;
    let mut pairs = Vec::new();
    for (i, &first) in x.iter().enumerate() {
        for (j, &second) in y.iter().enumerate() {
            let displacement = match cell {
                Some(cell) => min_image_displacement(cell, first, second),
                None => second - first,
            };
            let d2 = displacement.norm2();
            if d2 <= cutoff_sq {
                pairs.push((i, j, d2));
            }
        }
    }
    sort_pairs(&mut pairs);
    pairs
}

pub fn sort_pairs(pairs: &mut PairSet) {
    pairs.sort_unstable_by(|a, b| {
        (a.0, a.1)
            .cmp(&(b.0, b.1))
            .then_with(|| a.2.total_cmp(&b.2))
    });
}

/// Collect the `(i, j, d²)` set visited by the single-set traversal,
/// checking the callback contract along the way.
pub fn collect_pairs<const N: usize>(
    grid: &CellGrid<N>,
    list: &CellList<N>,
    options: &MapOptions,
) -> PairSet {
    let mut pairs = map_pairwise_with(
        |x, y, i, j, d2, mut pairs: PairSet| {
            assert_ne!(i, j, "a particle was paired with itself or its image");
            let delta = x - y;
            assert!(
                (delta.norm2() - d2).abs() <= 1e-9 * d2.max(1.0),
                "callback coordinates do not match the reported distance"
            );
            pairs.push((usize::min(i, j), usize::max(i, j), d2));
            pairs
        },
        Vec::new(),
        |mut first, second| {
            first.extend(second);
            first
        },
        grid,
        list,
        options,
    )
    .expect("pairwise map failed");
    sort_pairs(&mut pairs);
    pairs
}

/// Collect the `(i, j, d²)` set visited by the two-set traversal, in the
/// user's ordering.
pub fn collect_pairs_two_sets<const N: usize>(
    grid: &CellGrid<N>,
    pair: &CellListPair<N>,
    options: &MapOptions,
) -> PairSet {
    let mut pairs = map_pairwise_pair_with(
        |x, y, i, j, d2, mut pairs: PairSet| {
            let delta = x - y;
            assert!(
                (delta.norm2() - d2).abs() <= 1e-9 * d2.max(1.0),
                "callback coordinates do not match the reported distance"
            );
            pairs.push((i, j, d2));
            pairs
        },
        Vec::new(),
        |mut first, second| {
            first.extend(second);
            first
        },
        grid,
        pair,
        options,
    )
    .expect("pairwise map failed");
    sort_pairs(&mut pairs);
    pairs
}

/// Compare two sorted pair sets: indices exactly, distances within floating
/// point noise.
pub fn assert_same_pairs(actual: &PairSet, expected: &PairSet) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "pair counts differ: {} vs {}",
        actual.len(),
        expected.len()
    );
    for (a, e) in actual.iter().zip(expected) {
        assert_eq!((a.0, a.1), (e.0, e.1), "pair indices differ");
        assert!(
            (a.2 - e.2).abs() <= 1e-9 * e.2.max(1.0),
            "distances differ for pair ({}, {}): {} vs {}",
            a.0, a.1, a.2, e.2
        );
    }
}

/// The option sets every property test runs under: serial, parallel with the
/// plain inner loop, and parallel with projection pruning forced on.
pub fn traversal_options() -> Vec<MapOptions> {
    let mut options = Vec::new();

    options.push(MapOptions {
        parallel: false,
        ..MapOptions::default()
    });

    for occupancy in [Occupancy::Sparse, Occupancy::Dense] {
        options.push(MapOptions {
            parallel: true,
            workload: Some(Workload {
                scale: Scale::Large,
                occupancy: occupancy,
            }),
            ..MapOptions::default()
        });
    }

    options
}

/// Uniform random points inside the cell spanned by `cell_matrix` rows.
pub fn random_points<const N: usize>(
    rng: &mut StdRng,
    cell: &UnitCell<N>,
    count: usize,
) -> Vec<Vector<N>> {
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        let mut fractional = Vector::zero();
        for i in 0..N {
            fractional[i] = rng.gen_range(0.0..1.0);
        }
        points.push(cell.cartesian(fractional));
    }
    points
}
