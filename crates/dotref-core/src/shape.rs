use std::fmt;

use smallvec::SmallVec;

/// Dimensions of a tensor. Every shape in the network is at most rank 3
/// (`(max_len, batch, hidden)`), so dims live inline.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(SmallVec<[usize; 4]>);

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Shape(SmallVec::from_slice(dims))
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Element count; a rank-0 shape holds one scalar.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.0.get(axis).copied()
    }

}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape{:?}", self.dims())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(usize::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(SmallVec::from_vec(dims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numel_and_dims() {
        let s = Shape::new(&[3, 4]);
        assert_eq!(s.ndim(), 2);
        assert_eq!(s.numel(), 12);
        assert_eq!(s.dim(1), Some(4));
        assert_eq!(s.dim(2), None);
        assert_eq!(Shape::new(&[]).numel(), 1);
        assert_eq!(Shape::new(&[0, 16]).numel(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::new(&[7, 128])), "[7, 128]");
        assert_eq!(format!("{:?}", Shape::new(&[2])), "Shape[2]");
    }
}
