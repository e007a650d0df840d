//! Dense 4-D chunk buffers.

use ndarray::Array4;

/// A dense `[bands][t][y][x]` tile of 64-bit floats with NaN as
/// nodata. `data` is `None` when any dimension of `size` is zero —
/// cheaper than an allocated zero-length array and makes
/// [`is_empty`](ChunkBuffer::is_empty) a simple check.
#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    size: (u32, u32, u32, u32),
    data: Option<Array4<f64>>,
}

impl ChunkBuffer {
    /// Allocates `bands * t * y * x` doubles filled with NaN.
    pub fn nan_filled(bands: u32, t: u32, y: u32, x: u32) -> Self {
        if bands == 0 || t == 0 || y == 0 || x == 0 {
            return ChunkBuffer::empty_with_bands(bands);
        }
        let data = Array4::from_elem(
            (bands as usize, t as usize, y as usize, x as usize),
            f64::NAN,
        );
        ChunkBuffer { size: (bands, t, y, x), data: Some(data) }
    }

    /// An empty buffer: `size = (bands, 0, 0, 0)`.
    pub fn empty_with_bands(bands: u32) -> Self {
        ChunkBuffer { size: (bands, 0, 0, 0), data: None }
    }

    pub fn from_array(data: Array4<f64>) -> Self {
        let shape = data.shape();
        let size = (shape[0] as u32, shape[1] as u32, shape[2] as u32, shape[3] as u32);
        if size.1 == 0 || size.2 == 0 || size.3 == 0 {
            ChunkBuffer { size: (size.0, 0, 0, 0), data: None }
        } else {
            ChunkBuffer { size, data: Some(data) }
        }
    }

    pub fn size(&self) -> (u32, u32, u32, u32) {
        self.size
    }

    pub fn total_size_bytes(&self) -> u64 {
        let (b, t, y, x) = self.size;
        b as u64 * t as u64 * y as u64 * x as u64 * std::mem::size_of::<f64>() as u64
    }

    /// True when any dimension is zero.
    pub fn is_empty(&self) -> bool {
        let (b, t, y, x) = self.size;
        b == 0 || t == 0 || y == 0 || x == 0
    }

    pub fn array(&self) -> Option<&Array4<f64>> {
        self.data.as_ref()
    }

    pub fn array_mut(&mut self) -> Option<&mut Array4<f64>> {
        self.data.as_mut()
    }

    /// Contiguous view over the buffer in `[bands][t][y][x]` axis
    /// order, or `None` for an empty buffer.
    pub fn as_slice(&self) -> Option<&[f64]> {
        self.data.as_ref().and_then(|a| a.as_slice())
    }

    pub fn as_slice_mut(&mut self) -> Option<&mut [f64]> {
        self.data.as_mut().and_then(|a| a.as_slice_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_filled_reports_size_and_bytes() {
        let buf = ChunkBuffer::nan_filled(2, 1, 3, 4);
        assert_eq!(buf.size(), (2, 1, 3, 4));
        assert_eq!(buf.total_size_bytes(), 2 * 1 * 3 * 4 * 8);
        assert!(!buf.is_empty());
        assert!(buf.as_slice().unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn zero_dim_is_empty() {
        let buf = ChunkBuffer::empty_with_bands(3);
        assert!(buf.is_empty());
        assert_eq!(buf.total_size_bytes(), 0);
        assert!(buf.as_slice().is_none());
    }
}
