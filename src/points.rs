use ndarray::ArrayView2;

use crate::{Error, Vector};

/// Component-wise lower and upper limits of a set of points, or `None` for an
/// empty set.
pub fn limits<const N: usize>(points: &[Vector<N>]) -> Option<(Vector<N>, Vector<N>)> {
    let mut iter = points.iter();
    let first = *iter.next()?;
    let mut min = first;
    let mut max = first;
    for point in iter {
        min = min.min(*point);
        max = max.max(*point);
    }
    Some((min, max))
}

/// Convert an `N x M` matrix of coordinates (one point per column) into the
/// internal vector representation. The two input conventions (slice of
/// vectors, coordinate matrix) produce identical results everywhere else in
/// this crate.
pub fn points_from_columns<const N: usize>(
    matrix: ArrayView2<'_, f64>,
) -> Result<Vec<Vector<N>>, Error> {
    if matrix.nrows() != N {
        return Err(Error::DimensionMismatch(format!(
            "expected a matrix with {} rows (one point per column), got {}",
            N,
            matrix.nrows()
        )));
    }

    let mut points = Vec::with_capacity(matrix.ncols());
    for column in matrix.columns() {
        let mut point = Vector::zero();
        for i in 0..N {
            point[i] = column[i];
        }
        points.push(point);
    }
    Ok(points)
}
