//! The image value type this crate operates on.

use ndarray::Array2;

/// A single 2D calibrated image. NaN marks a masked (invalid) pixel.
///
/// Immutable once constructed; every downstream stage reads through a shared
/// reference rather than cloning the backing array.
#[derive(Clone, Debug)]
pub struct PixelImage {
    data: Array2<f32>,
}

impl PixelImage {
    /// Wrap an existing array. No copy is made.
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> (usize, usize) {
        let dim = self.data.dim();
        dim
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f32> {
        self.data
    }

    /// Number of pixels that are not NaN.
    pub fn finite_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }

    /// A boolean mask, same shape, true where the pixel is finite.
    pub fn finite_mask(&self) -> Array2<bool> {
        self.data.mapv(|v| v.is_finite())
    }
}

impl std::ops::Index<(usize, usize)> for PixelImage {
    type Output = f32;

    fn index(&self, idx: (usize, usize)) -> &f32 {
        &self.data[idx]
    }
}
