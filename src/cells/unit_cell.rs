//! The `UnitCell` type represents the periodic tile of a simulated system,
//! with some type of periodic condition.

use crate::{Error, SquareMatrix, Vector};

/// The shape of a cell determines how we will be able to compute the periodic
/// boundary conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellShape {
    /// Orthorhombic unit cell, with cuboid shape
    Orthorhombic,
    /// Triclinic unit cell, with arbitrary parallelepiped shape
    Triclinic,
    /// No periodic boundary conditions; the cell is a bounding box derived
    /// from the coordinates
    NonPeriodic,
}

/// A `UnitCell` defines the system's physical boundaries.
///
/// Each row of the cell matrix is one lattice vector. The matrix must have
/// non-negative entries, and for triclinic cells each diagonal entry must
/// dominate the other vectors' contributions along the same axis: this keeps
/// `floor`-based wrapping inside a bounded range of periodic images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitCell<const N: usize> {
    /// Unit cell matrix, rows are the lattice vectors
    matrix: SquareMatrix<N>,
    /// Transpose of the unit cell matrix (columns are the lattice vectors),
    /// cached from matrix
    transpose: SquareMatrix<N>,
    /// Inverse of the transpose of the unit cell matrix, cached from matrix
    inverse: SquareMatrix<N>,
    /// Unit cell shape
    shape: CellShape,
}

fn is_close_0(value: f64) -> bool {
    f64::abs(value) < 1e-6
}

impl<const N: usize> UnitCell<N> {
    /// Create a unit cell from a matrix whose rows are the lattice vectors.
    pub fn from_matrix(matrix: SquareMatrix<N>) -> Result<UnitCell<N>, Error> {
        let mut is_diagonal = true;
        for i in 0..N {
            for j in 0..N {
                if matrix[i][j] < 0.0 {
                    return Err(Error::InvalidBox(format!(
                        "cell matrix entries must be non-negative, got {} at [{}, {}]",
                        matrix[i][j], i, j
                    )));
                }
                if i != j && !is_close_0(matrix[i][j]) {
                    is_diagonal = false;
                }
            }
        }

        for i in 0..N {
            if matrix[i][i] <= 0.0 {
                return Err(Error::InvalidBox(format!(
                    "cell matrix diagonal entries must be positive, got {} at [{}, {}]",
                    matrix[i][i], i, i
                )));
            }
        }

        if !is_diagonal {
            // with the axis contributions of the other lattice vectors
            // bounded by the diagonal, wrapped coordinates stay within one
            // image of the primary cell
            for axis in 0..N {
                let mut off_diagonal = 0.0;
                for vector in 0..N {
                    if vector != axis {
                        off_diagonal += matrix[vector][axis];
                    }
                }
                if off_diagonal > matrix[axis][axis] {
                    return Err(Error::InvalidBox(format!(
                        "lattice vectors lean too far along axis {}: \
                         off-diagonal contributions {} exceed the diagonal {}",
                        axis, off_diagonal, matrix[axis][axis]
                    )));
                }
            }
        }

        let transpose = matrix.transposed();
        let inverse = match transpose.try_inverse() {
            Some(inverse) => inverse,
            None => {
                return Err(Error::InvalidBox("cell matrix is singular".into()));
            }
        };

        let shape = if is_diagonal {
            CellShape::Orthorhombic
        } else {
            CellShape::Triclinic
        };

        Ok(UnitCell {
            matrix: matrix,
            transpose: transpose,
            inverse: inverse,
            shape: shape,
        })
    }

    /// Create an orthorhombic unit cell with the given side lengths.
    pub fn orthorhombic(sides: [f64; N]) -> Result<UnitCell<N>, Error> {
        UnitCell::from_matrix(SquareMatrix::diagonal(sides))
    }

    /// Create a cubic unit cell with side length `length`.
    pub fn cubic(length: f64) -> Result<UnitCell<N>, Error> {
        UnitCell::orthorhombic([length; N])
    }

    /// Create a non-periodic cell from the bounding limits of the
    /// coordinates. Points are never wrapped in such a cell.
    pub fn bounding(min: Vector<N>, max: Vector<N>) -> Result<UnitCell<N>, Error> {
        let mut sides = [0.0; N];
        for i in 0..N {
            if max[i] < min[i] {
                return Err(Error::InvalidBox(format!(
                    "upper limit is below lower limit along axis {}", i
                )));
            }
            // degenerate (flat) extents are fine without periodicity, but the
            // matrix must stay invertible
            sides[i] = f64::max(max[i] - min[i], 1.0);
        }

        let matrix = SquareMatrix::diagonal(sides);
        Ok(UnitCell {
            matrix: matrix,
            transpose: matrix,
            inverse: match matrix.try_inverse() {
                Some(inverse) => inverse,
                None => return Err(Error::InvalidBox("cell matrix is singular".into())),
            },
            shape: CellShape::NonPeriodic,
        })
    }

    /// Get the cell shape
    pub fn shape(&self) -> CellShape {
        self.shape
    }

    /// Check if this cell has periodic boundary conditions
    pub fn is_periodic(&self) -> bool {
        self.shape != CellShape::NonPeriodic
    }

    /// Get the matricial representation of the unit cell (rows are the
    /// lattice vectors)
    pub fn matrix(&self) -> SquareMatrix<N> {
        self.matrix
    }

    /// Get the `i`-th lattice vector
    pub fn vector(&self, i: usize) -> Vector<N> {
        self.matrix.row(i)
    }

    /// Sum of the lattice vectors, i.e. the far corner of the cell in
    /// cartesian coordinates
    pub fn extent(&self) -> Vector<N> {
        let mut extent = Vector::zero();
        for i in 0..N {
            extent += self.matrix.row(i);
        }
        extent
    }

    /// Get the distances between opposite faces of the unit cell
    pub fn distances_between_faces(&self) -> Vector<N> {
        if self.shape == CellShape::NonPeriodic {
            return Vector::splat(f64::INFINITY);
        }

        // the fractional coordinate `f_i` changes by `‖row_i(inverse)‖` per
        // unit of cartesian distance orthogonal to the face, so the slab
        // between the faces `f_i = 0` and `f_i = 1` is `1/‖row_i(inverse)‖`
        // wide
        let mut distances = Vector::zero();
        for i in 0..N {
            distances[i] = 1.0 / self.inverse.row(i).norm();
        }
        distances
    }

    /// Get the volume of the cell
    pub fn volume(&self) -> f64 {
        f64::abs(self.matrix.determinant())
    }
}

/// Geometric operations using periodic boundary conditions
impl<const N: usize> UnitCell<N> {
    /// Get the fractional representation of the `vector` in this cell
    #[inline]
    pub fn fractional(&self, vector: Vector<N>) -> Vector<N> {
        self.inverse * vector
    }

    /// Get the cartesian representation of the `fractional` vector in this
    /// cell
    #[inline]
    pub fn cartesian(&self, fractional: Vector<N>) -> Vector<N> {
        self.transpose * fractional
    }

    /// Wrap a point into the unit cell, obeying the periodic boundary
    /// conditions. For a cubic cell of side length `L`, this produces
    /// components in `[0, L)`.
    #[inline]
    pub fn wrap(&self, vector: Vector<N>) -> Vector<N> {
        match self.shape {
            CellShape::NonPeriodic => vector,
            CellShape::Orthorhombic => {
                let mut wrapped = vector;
                for i in 0..N {
                    let length = self.matrix[i][i];
                    wrapped[i] -= f64::floor(wrapped[i] / length) * length;
                }
                wrapped
            }
            CellShape::Triclinic => {
                let fractional = self.fractional(vector);
                self.cartesian(fractional - fractional.floor())
            }
        }
    }

    /// Translation to the periodic image identified by the integer
    /// coefficients in `image`
    #[inline]
    pub fn image_translation(&self, image: &[i32; N]) -> Vector<N> {
        let mut translation = Vector::zero();
        for i in 0..N {
            translation += self.matrix.row(i) * f64::from(image[i]);
        }
        translation
    }
}
