//! Tensor shape with broadcasting rules.

use std::fmt;

/// Dimensions of a tensor, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Numpy-style broadcast of two shapes, aligned from the trailing dimension.
    ///
    /// Returns `None` when a pair of dimensions differs and neither is 1.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let ndim = self.ndim().max(other.ndim());
        let mut dims = vec![0usize; ndim];
        for i in 0..ndim {
            let a = if i < ndim - self.ndim() { 1 } else { self.dims[i - (ndim - self.ndim())] };
            let b = if i < ndim - other.ndim() { 1 } else { other.dims[i - (ndim - other.ndim())] };
            dims[i] = match (a, b) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                _ => return None,
            };
        }
        Some(Shape::new(dims))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numel() {
        assert_eq!(Shape::new(vec![2, 3, 4]).numel(), 24);
        assert_eq!(Shape::new(Vec::new()).numel(), 1);
    }

    #[test]
    fn test_broadcast_trailing() {
        let a = Shape::from([4, 1, 8]);
        let b = Shape::from([3, 1]);
        assert_eq!(a.broadcast_with(&b).unwrap().dims(), &[4, 3, 8]);
    }

    #[test]
    fn test_broadcast_incompatible() {
        let a = Shape::from([2, 3]);
        let b = Shape::from([4]);
        assert!(a.broadcast_with(&b).is_none());
    }
}
