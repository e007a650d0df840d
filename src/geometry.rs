//! Geometry manipulation utilities

use geo::Rect;

/// Represents axis-aligned rectangular region. The region
/// contains the left, and top edges, but _does not contain_
/// the right, and bottom edges.
pub type Bounds = Rect<f64>;

/// Utilities to calculate using [`Bounds`].
pub trait BoundsExt {
    /// Compute the intersection of `self` with another
    /// bounds. Returns `None` if the two regions do not
    /// intersect.
    fn intersect(&self, other: &Self) -> Option<Self>
    where
        Self: Sized;
}

impl BoundsExt for Bounds {
    fn intersect(&self, other: &Self) -> Option<Self>
    where
        Self: Sized,
    {
        let min = (
            self.min().x.max(other.min().x),
            self.min().y.max(other.min().y),
        );
        let max = (
            self.max().x.min(other.max().x),
            self.max().y.min(other.max().y),
        );

        if min.0 < max.0 && min.1 < max.1 {
            Some(Rect::new(min, max))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_overlapping() {
        let a = Bounds::new((0.0, 0.0), (10.0, 10.0));
        let b = Bounds::new((5.0, 5.0), (15.0, 15.0));
        let i = a.intersect(&b).unwrap();
        assert_eq!((i.min().x, i.min().y), (5.0, 5.0));
        assert_eq!((i.max().x, i.max().y), (10.0, 10.0));
    }

    #[test]
    fn intersect_disjoint_is_none() {
        let a = Bounds::new((0.0, 0.0), (1.0, 1.0));
        let b = Bounds::new((2.0, 2.0), (3.0, 3.0));
        assert!(a.intersect(&b).is_none());
    }
}
