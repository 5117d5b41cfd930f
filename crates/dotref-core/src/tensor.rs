use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::error::CoreError;
use crate::shape::Shape;
use crate::Result;

/// A dense row-major f32 array.
///
/// Storage is reference counted, so cloning a tensor (e.g. to thread the
/// per-entity context embeddings through every dialogue state) is cheap.
/// Writes go through [`Tensor::data_mut`], which copies on write when the
/// storage is shared.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Arc<Vec<f32>>,
    shape: Shape,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a tensor from owned data, checking it against the shape.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let s = Shape::new(shape);
        if s.numel() != data.len() {
            return Err(CoreError::DataLength {
                shape: shape.to_vec(),
                numel: s.numel(),
                len: data.len(),
            });
        }
        Ok(Self {
            data: Arc::new(data),
            shape: s,
        })
    }

    /// Create a tensor by copying a slice.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    pub fn zeros(shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        Self {
            data: Arc::new(vec![0.0; s.numel()]),
            shape: s,
        }
    }

    /// Uniform values in `[-range, range]`, the init used for every weight.
    pub fn rand_uniform<R: Rng + ?Sized>(shape: &[usize], range: f32, rng: &mut R) -> Self {
        let s = Shape::new(shape);
        let data: Vec<f32> = if range > 0.0 {
            (0..s.numel()).map(|_| rng.gen_range(-range..=range)).collect()
        } else {
            vec![0.0; s.numel()]
        };
        Self {
            data: Arc::new(data),
            shape: s,
        }
    }

    /// Stack equally sized rows into a `(rows.len(), width)` matrix.
    pub fn stack_rows(rows: &[Vec<f32>], width: usize) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            if row.len() != width {
                return Err(CoreError::ShapeMismatch {
                    expected: vec![width],
                    got: vec![row.len()],
                });
            }
            data.extend_from_slice(row);
        }
        Self::from_vec(data, &[rows.len(), width])
    }

    /// Concatenate 2-D tensors along the row axis.
    pub fn concat_rows(parts: &[&Tensor], width: usize) -> Result<Self> {
        let mut data = Vec::new();
        let mut rows = 0;
        for part in parts {
            let (r, c) = part.dims2()?;
            if c != width {
                return Err(CoreError::ShapeMismatch {
                    expected: vec![r, width],
                    got: vec![r, c],
                });
            }
            data.extend_from_slice(part.as_slice());
            rows += r;
        }
        Self::from_vec(data, &[rows, width])
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// `(rows, cols)` of a 2-D tensor.
    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.dims() {
            [r, c] => Ok((*r, *c)),
            other => Err(CoreError::Rank {
                expected: 2,
                got: other.len(),
            }),
        }
    }

    // =========================================================================
    // Data access
    // =========================================================================

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.as_ref().clone()
    }

    /// Borrow row `i` of a 2-D tensor.
    pub fn row(&self, i: usize) -> Result<&[f32]> {
        let (rows, cols) = self.dims2()?;
        if i >= rows {
            return Err(CoreError::IndexOutOfBounds {
                index: i,
                axis: 0,
                size: rows,
            });
        }
        Ok(&self.data[i * cols..(i + 1) * cols])
    }

    /// Last row of a 2-D tensor, `None` when it has no rows.
    pub fn last_row(&self) -> Option<&[f32]> {
        let (rows, _) = self.dims2().ok()?;
        if rows == 0 {
            return None;
        }
        self.row(rows - 1).ok()
    }

    /// Mean of the rows at `indices` (repeats allowed).
    ///
    /// When every index names the same row the result is that row, bit for bit.
    pub fn mean_rows(&self, indices: &[usize]) -> Result<Vec<f32>> {
        let first = *indices.first().ok_or(CoreError::Empty("row indices"))?;
        if indices.iter().all(|&i| i == first) {
            return Ok(self.row(first)?.to_vec());
        }
        let (_, cols) = self.dims2()?;
        let mut acc = vec![0.0f32; cols];
        for &i in indices {
            for (a, v) in acc.iter_mut().zip(self.row(i)?) {
                *a += v;
            }
        }
        let inv = 1.0 / indices.len() as f32;
        acc.iter_mut().for_each(|a| *a *= inv);
        Ok(acc)
    }

    /// Element-wise comparison within an absolute tolerance.
    pub fn approx_eq(&self, other: &Tensor, tol: f32) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={})", self.shape)
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.numel();
        if n <= 20 {
            write!(f, "tensor({:?}, shape={})", self.data.as_slice(), self.shape)
        } else {
            write!(
                f,
                "tensor([{:.4}, {:.4}, ..., {:.4}], shape={})",
                self.data[0],
                self.data[1],
                self.data[n - 1],
                self.shape
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Tensor::from_vec(vec![1.0, 2.0, 3.0], &[2, 2]).is_err());
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        assert_eq!(t.dims2().unwrap(), (2, 2));
    }

    #[test]
    fn test_row_access() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap();
        assert_eq!(t.row(1).unwrap(), &[3.0, 4.0]);
        assert!(t.row(3).is_err());
        assert_eq!(t.last_row().unwrap(), &[5.0, 6.0]);
    }

    #[test]
    fn test_mean_rows_single_index_is_exact() {
        let t = Tensor::from_f32(&[0.1, 0.7, -0.3, 0.9], &[2, 2]).unwrap();
        assert_eq!(t.mean_rows(&[1, 1, 1]).unwrap(), vec![-0.3, 0.9]);
        assert!((t.mean_rows(&[0, 1]).unwrap()[1] - 0.8).abs() < 1e-6);
        assert!(t.mean_rows(&[]).is_err());
    }

    #[test]
    fn test_concat_and_stack() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[1, 2]).unwrap();
        let b = Tensor::from_f32(&[3.0, 4.0, 5.0, 6.0], &[2, 2]).unwrap();
        let c = Tensor::concat_rows(&[&a, &b], 2).unwrap();
        assert_eq!(c.dims(), &[3, 2]);
        let s = Tensor::stack_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]], 2).unwrap();
        assert_eq!(s.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(Tensor::stack_rows(&[vec![1.0]], 2).is_err());
    }

    #[test]
    fn test_copy_on_write() {
        let a = Tensor::zeros(&[2]);
        let mut b = a.clone();
        b.data_mut()[0] = 1.0;
        assert_eq!(a.as_slice(), &[0.0, 0.0]);
        assert_eq!(b.as_slice(), &[1.0, 0.0]);
    }

    #[test]
    fn test_rand_uniform_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = Tensor::rand_uniform(&[16, 4], 0.1, &mut rng);
        assert!(t.as_slice().iter().all(|v| v.abs() <= 0.1));
    }
}
