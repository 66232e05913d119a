mod common;

use common::{
    assert_same_pairs, collect_pairs, min_image_displacement, naive_pairs, random_points,
    traversal_options,
};

use cellmap::{
    map_pairwise, points_from_columns, Batches, CellGrid, CellList, GridOptions, ListOptions,
    MapOptions, SquareMatrix, UnitCell, Vector,
};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn orthorhombic_box_matches_naive() {
    let mut rng = StdRng::seed_from_u64(0xCE11);
    let cell = UnitCell::orthorhombic([18.0, 25.0, 30.0]).unwrap();
    let points = random_points(&mut rng, &cell, 150);
    let expected = naive_pairs(&points, Some(&cell), 3.0);
    assert!(!expected.is_empty());

    for lcell in [1, 2, 3, 5] {
        let grid = CellGrid::with_options(cell, 3.0, &GridOptions { lcell: lcell }).unwrap();
        let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();
        for options in traversal_options() {
            assert_same_pairs(&collect_pairs(&grid, &list, &options), &expected);
        }
    }
}

#[test]
fn triclinic_box_matches_naive() {
    let mut rng = StdRng::seed_from_u64(0x7121);
    let cell = UnitCell::from_matrix(SquareMatrix::new([
        [20.0, 0.0, 2.0],
        [1.0, 20.0, 0.0],
        [0.0, 0.0, 20.0],
    ]))
    .unwrap();
    let points = random_points(&mut rng, &cell, 150);
    let expected = naive_pairs(&points, Some(&cell), 2.5);
    assert!(!expected.is_empty());

    for lcell in [1, 2, 3] {
        let grid = CellGrid::with_options(cell, 2.5, &GridOptions { lcell: lcell }).unwrap();
        let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();
        for options in traversal_options() {
            assert_same_pairs(&collect_pairs(&grid, &list, &options), &expected);
        }
    }
}

#[test]
fn two_dimensional_box_matches_naive() {
    let mut rng = StdRng::seed_from_u64(0x2D);
    let cell = UnitCell::orthorhombic([15.0, 12.0]).unwrap();
    let points = random_points(&mut rng, &cell, 120);
    let expected = naive_pairs(&points, Some(&cell), 2.0);
    assert!(!expected.is_empty());

    for lcell in [1, 2] {
        let grid = CellGrid::with_options(cell, 2.0, &GridOptions { lcell: lcell }).unwrap();
        let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();
        for options in traversal_options() {
            assert_same_pairs(&collect_pairs(&grid, &list, &options), &expected);
        }
    }
}

#[test]
fn non_periodic_matches_naive() {
    let mut rng = StdRng::seed_from_u64(0x0FF);
    let mut points = Vec::new();
    for _ in 0..200 {
        points.push(Vector::new([
            rng.gen_range(0.0..30.0),
            rng.gen_range(-10.0..20.0),
            rng.gen_range(0.0..30.0),
        ]));
    }

    let expected = naive_pairs(&points, None, 3.5);
    assert!(!expected.is_empty());

    let grid = CellGrid::non_periodic(&points, 3.5).unwrap();
    let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();
    for options in traversal_options() {
        assert_same_pairs(&collect_pairs(&grid, &list, &options), &expected);
    }
}

#[test]
fn matrix_input_is_equivalent() {
    let mut rng = StdRng::seed_from_u64(0x3A7);
    let cell = UnitCell::<3>::cubic(20.0).unwrap();
    let points = random_points(&mut rng, &cell, 100);

    // one point per column
    let mut matrix = Array2::zeros((3, points.len()));
    for (j, point) in points.iter().enumerate() {
        for i in 0..3 {
            matrix[[i, j]] = point[i];
        }
    }
    let from_matrix = points_from_columns::<3>(matrix.view()).unwrap();
    assert_eq!(from_matrix, points);

    let grid = CellGrid::new(cell, 2.0).unwrap();
    let options = MapOptions::default();

    let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();
    let from_vectors = collect_pairs(&grid, &list, &options);

    let list = CellList::new(&from_matrix, &grid, &ListOptions::default()).unwrap();
    assert_same_pairs(&collect_pairs(&grid, &list, &options), &from_vectors);
}

/// Coordinates clustered on both sides of the `x = 0` face, so many pairs
/// cross the periodic boundary.
fn clustered_points(rng: &mut StdRng, count: usize) -> Vec<Vector<3>> {
    let mut points = Vec::with_capacity(count);
    for i in 0..count {
        let x = if i % 2 == 0 {
            rng.gen_range(0.0..5.0)
        } else {
            rng.gen_range(245.0..250.0)
        };
        points.push(Vector::new([
            x,
            rng.gen_range(0.0..250.0),
            rng.gen_range(0.0..250.0),
        ]));
    }
    points
}

#[test]
fn clustered_histogram_matches_naive() {
    let mut rng = StdRng::seed_from_u64(0x4157);
    let points = clustered_points(&mut rng, 1200);
    let cell = UnitCell::orthorhombic([250.0, 250.0, 250.0]).unwrap();
    let cutoff = 10.0;

    let mut expected = vec![0_usize; 10];
    for &(_, _, d2) in &naive_pairs(&points, Some(&cell), cutoff) {
        let bin = usize::min(d2.sqrt().floor() as usize, 9);
        expected[bin] += 1;
    }
    assert!(expected.iter().sum::<usize>() > 0);

    let grid = CellGrid::new(cell, cutoff).unwrap();
    let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();

    for options in traversal_options() {
        let histogram = map_pairwise(
            |_, _, _, _, d2, mut histogram: Vec<usize>| {
                let bin = usize::min(d2.sqrt().floor() as usize, 9);
                histogram[bin] += 1;
                histogram
            },
            vec![0_usize; 10],
            &grid,
            &list,
            &options,
        )
        .unwrap();
        assert_eq!(histogram, expected);
    }
}

#[test]
fn triclinic_forces_match_naive() {
    let mut rng = StdRng::seed_from_u64(0x6F4C);
    let cell = UnitCell::from_matrix(SquareMatrix::new([
        [250.0, 0.0, 10.0],
        [10.0, 250.0, 0.0],
        [0.0, 0.0, 250.0],
    ]))
    .unwrap();
    let points = random_points(&mut rng, &cell, 800);
    let cutoff = 10.0;
    let masses: Vec<f64> = points.iter().map(|point| 5.0 * point[1]).collect();

    // newtonian pair forces: f_ij = m_i m_j (y - x) / d³
    let mut expected = vec![Vector::zero(); points.len()];
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let displacement = min_image_displacement(&cell, points[i], points[j]);
            let d2 = displacement.norm2();
            if d2 <= cutoff * cutoff {
                let force = displacement * (masses[i] * masses[j] / (d2 * d2.sqrt()));
                expected[i] += force;
                expected[j] -= force;
            }
        }
    }

    let grid = CellGrid::new(cell, cutoff).unwrap();
    let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();

    for options in traversal_options() {
        let forces = map_pairwise(
            |x, y, i, j, d2, mut forces: Vec<Vector<3>>| {
                let force = (y - x) * (masses[i] * masses[j] / (d2 * d2.sqrt()));
                forces[i] += force;
                forces[j] -= force;
                forces
            },
            vec![Vector::zero(); points.len()],
            &grid,
            &list,
            &options,
        )
        .unwrap();

        let scale = expected
            .iter()
            .map(|force| force.norm())
            .fold(0.0_f64, f64::max);
        for (actual, reference) in forces.iter().zip(&expected) {
            for axis in 0..3 {
                assert!(
                    (actual[axis] - reference[axis]).abs() <= 1e-9 * scale,
                    "force mismatch: {} vs {}",
                    actual[axis],
                    reference[axis]
                );
            }
        }
    }
}

#[test]
fn dense_cells_match_naive() {
    // a tight cluster: tens of records per cell, so cross-cell work goes
    // through the projection-pruned loop
    let mut rng = StdRng::seed_from_u64(0xDE5E);
    let cell = UnitCell::<3>::cubic(60.0).unwrap();
    let mut points = Vec::new();
    for _ in 0..500 {
        points.push(Vector::new([
            rng.gen_range(20.0..30.0),
            rng.gen_range(20.0..30.0),
            rng.gen_range(20.0..30.0),
        ]));
    }
    let cutoff = 5.0;

    let expected = naive_pairs(&points, Some(&cell), cutoff);
    assert!(!expected.is_empty());

    let grid = CellGrid::new(cell, cutoff).unwrap();
    let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();

    // the heuristic itself must see this as dense
    let workload = cellmap::Workload::classify(
        list.n_real(),
        list.n_entries(),
        list.n_occupied_cells(),
    );
    assert!(workload.use_projection());

    for options in traversal_options() {
        assert_same_pairs(&collect_pairs(&grid, &list, &options), &expected);
    }
}

#[test]
fn refresh_is_equivalent_to_fresh_build() {
    let mut rng = StdRng::seed_from_u64(0x5E4);
    let small_cell = UnitCell::<3>::cubic(50.0).unwrap();
    let small_grid = CellGrid::new(small_cell, 5.0).unwrap();
    let initial = random_points(&mut rng, &small_cell, 400);

    let mut list = CellList::new(&initial, &small_grid, &ListOptions::default()).unwrap();

    // grow to more particles in a larger cell
    let large_cell = UnitCell::<3>::cubic(80.0).unwrap();
    let large_grid = CellGrid::new(large_cell, 6.0).unwrap();
    let updated = random_points(&mut rng, &large_cell, 3000);
    list.update(&updated, &large_grid).unwrap();

    let fresh = CellList::new(&updated, &large_grid, &ListOptions::default()).unwrap();

    let options = MapOptions::default();
    assert_same_pairs(
        &collect_pairs(&large_grid, &list, &options),
        &collect_pairs(&large_grid, &fresh, &options),
    );

    // and shrink back
    list.update(&initial, &small_grid).unwrap();
    let fresh = CellList::new(&initial, &small_grid, &ListOptions::default()).unwrap();
    assert_same_pairs(
        &collect_pairs(&small_grid, &list, &options),
        &collect_pairs(&small_grid, &fresh, &options),
    );
}

#[test]
fn result_does_not_depend_on_batching() {
    let mut rng = StdRng::seed_from_u64(0x6A7C);
    let cell = UnitCell::<3>::cubic(50.0).unwrap();
    let points = random_points(&mut rng, &cell, 1200);
    let cutoff = 4.0;

    let reference: f64 = naive_pairs(&points, Some(&cell), cutoff)
        .iter()
        .map(|&(_, _, d2)| 1.0 / d2.sqrt())
        .sum();

    let grid = CellGrid::new(cell, cutoff).unwrap();
    let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();

    for (map, reduce) in [(1, 1), (3, 5), (7, 1), (1, 7), (4, 16), (13, 17)] {
        let potential = map_pairwise(
            |_, _, _, _, d2, potential: f64| potential + 1.0 / d2.sqrt(),
            0.0,
            &grid,
            &list,
            &MapOptions {
                parallel: true,
                nbatches: Batches { map: map, reduce: reduce },
                ..MapOptions::default()
            },
        )
        .unwrap();

        assert!(
            (potential - reference).abs() <= 1e-10 * reference.abs(),
            "potential {} differs from the reference {} for batches ({}, {})",
            potential,
            reference,
            map,
            reduce
        );
    }
}

#[test]
fn pair_multiset_is_deterministic_across_batching() {
    let mut rng = StdRng::seed_from_u64(0xDE7);
    let cell = UnitCell::<3>::cubic(30.0).unwrap();
    let points = random_points(&mut rng, &cell, 500);

    let grid = CellGrid::new(cell, 3.0).unwrap();
    let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();

    let reference = collect_pairs(&grid, &list, &MapOptions { parallel: false, ..MapOptions::default() });
    assert!(!reference.is_empty());

    for (map, reduce) in [(3, 5), (7, 1), (13, 17)] {
        let pairs = collect_pairs(
            &grid,
            &list,
            &MapOptions {
                parallel: true,
                nbatches: Batches { map: map, reduce: reduce },
                workload: Some(cellmap::Workload {
                    scale: cellmap::Scale::Large,
                    occupancy: cellmap::Occupancy::Sparse,
                }),
                ..MapOptions::default()
            },
        );
        assert_same_pairs(&pairs, &reference);
    }
}

#[test]
fn thin_box_images_are_not_double_counted() {
    // every particle has many ghost copies in a cell barely wider than two
    // cutoffs; pairs must still be reported exactly once
    let mut rng = StdRng::seed_from_u64(0x781B);
    let cell = UnitCell::orthorhombic([4.2, 4.2, 40.0]).unwrap();
    let points = random_points(&mut rng, &cell, 60);
    let cutoff = 2.0;

    let expected = naive_pairs(&points, Some(&cell), cutoff);
    assert!(!expected.is_empty());

    let grid = CellGrid::new(cell, cutoff).unwrap();
    let list = CellList::new(&points, &grid, &ListOptions::default()).unwrap();
    for options in traversal_options() {
        assert_same_pairs(&collect_pairs(&grid, &list, &options), &expected);
    }
}
