//! Island segmentation: two-threshold (seed/flood) connected-component
//! labeling on a signal-to-noise map.

use ndarray::Array2;

/// A contiguous set of pixels above `flood_clip` containing at least one
/// pixel above `seed_clip`.
#[derive(Clone, Debug)]
pub struct Island {
    /// Unique id, assigned in raster order of each island's seed (first
    /// encountered) pixel.
    pub id: u32,
    /// Inclusive bounding box `(row_min, row_max, col_min, col_max)`.
    pub bbox: (usize, usize, usize, usize),
    /// Pixel values cropped to `bbox`; NaN where the pixel is not part of
    /// this island.
    pub pixels: Array2<f32>,
    /// Local RMS values cropped to `bbox`, aligned with `pixels`.
    pub rms: Array2<f32>,
    /// Location of the peak-SNR pixel, in full-image coordinates.
    pub seed_row: usize,
    pub seed_col: usize,
}

impl Island {
    /// Count of non-NaN pixels in the island.
    pub fn finite_count(&self) -> usize {
        self.pixels.iter().filter(|v| v.is_finite()).count()
    }

    pub fn height(&self) -> usize {
        self.bbox.1 - self.bbox.0 + 1
    }

    pub fn width(&self) -> usize {
        self.bbox.3 - self.bbox.2 + 1
    }
}

/// Finds islands on `data`/`rms` using a seed/flood two-threshold scheme.
pub struct IslandSegmenter {
    pub seed_clip: f64,
    pub flood_clip: f64,
}

impl IslandSegmenter {
    pub fn new(seed_clip: f64, flood_clip: f64) -> Self {
        Self {
            seed_clip,
            flood_clip,
        }
    }

    /// `sky_mask`, if given, must be the same shape as `data`: pixels where
    /// it is `false` are excluded from island membership consideration
    /// (typically produced upstream by converting a sky-region mask through
    /// a WCS provider once per image).
    pub fn segment(
        &self,
        data: &Array2<f32>,
        rms: &Array2<f32>,
        sky_mask: Option<&Array2<bool>>,
    ) -> Vec<Island> {
        let (h, w) = data.dim();
        if h == 0 || w == 0 {
            return Vec::new();
        }

        let snr = Array2::from_shape_fn((h, w), |(r, c)| {
            let d = data[[r, c]] as f64;
            let s = rms[[r, c]] as f64;
            if !d.is_finite() || !s.is_finite() || s <= 0.0 {
                f64::NAN
            } else {
                d.abs() / s
            }
        });

        let flood_mask = Array2::from_shape_fn((h, w), |(r, c)| snr[[r, c]] >= self.flood_clip);

        let labels = label_components(&flood_mask);
        let mut groups: std::collections::HashMap<u32, Vec<(usize, usize)>> =
            std::collections::HashMap::new();
        for r in 0..h {
            for c in 0..w {
                let lbl = labels[[r, c]];
                if lbl != 0 {
                    groups.entry(lbl).or_default().push((r, c));
                }
            }
        }

        let mut islands: Vec<Island> = Vec::new();
        for (_, members) in groups {
            let mut max_snr = f64::NEG_INFINITY;
            let mut seed = members[0];
            let mut row_min = usize::MAX;
            let mut row_max = 0usize;
            let mut col_min = usize::MAX;
            let mut col_max = 0usize;
            for &(r, c) in &members {
                row_min = row_min.min(r);
                row_max = row_max.max(r);
                col_min = col_min.min(c);
                col_max = col_max.max(c);
                if snr[[r, c]] > max_snr {
                    max_snr = snr[[r, c]];
                    seed = (r, c);
                }
            }
            if max_snr < self.seed_clip {
                continue;
            }

            if let Some(mask) = sky_mask {
                if !members.iter().any(|&(r, c)| mask[[r, c]]) {
                    continue;
                }
            }

            let member_set: std::collections::HashSet<(usize, usize)> =
                members.into_iter().collect();
            let bh = row_max - row_min + 1;
            let bw = col_max - col_min + 1;
            let mut pixels = Array2::<f32>::from_elem((bh, bw), f32::NAN);
            let mut rms_crop = Array2::<f32>::from_elem((bh, bw), f32::NAN);
            for r in row_min..=row_max {
                for c in col_min..=col_max {
                    if member_set.contains(&(r, c)) {
                        pixels[[r - row_min, c - col_min]] = data[[r, c]];
                        rms_crop[[r - row_min, c - col_min]] = rms[[r, c]];
                    }
                }
            }

            let finite = pixels.iter().filter(|v| v.is_finite()).count();
            if finite <= 1 {
                continue;
            }

            islands.push(Island {
                id: 0, // reassigned below in raster order
                bbox: (row_min, row_max, col_min, col_max),
                pixels,
                rms: rms_crop,
                seed_row: seed.0,
                seed_col: seed.1,
            });
        }

        // Deterministic raster order of each island's seed pixel.
        islands.sort_by_key(|isl| (isl.seed_row, isl.seed_col));
        for (i, isl) in islands.iter_mut().enumerate() {
            isl.id = i as u32;
        }
        islands
    }
}

/// 4-connected union-find labeling, same structure as the teacher's
/// `detection::components::connected_components` but returning the full
/// label array (this crate needs per-pixel membership, not just bboxes).
pub(crate) fn label_components(mask: &Array2<bool>) -> Array2<u32> {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    let mut next_label: u32 = 1;
    let mut parent: Vec<u32> = vec![0; h * w / 2 + 2];

    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }
            let up = if row > 0 { labels[[row - 1, col]] } else { 0 };
            let left = if col > 0 { labels[[row, col - 1]] } else { 0 };

            match (up > 0, left > 0) {
                (false, false) => {
                    if next_label as usize >= parent.len() {
                        parent.resize(parent.len() * 2, 0);
                    }
                    parent[next_label as usize] = next_label;
                    labels[[row, col]] = next_label;
                    next_label += 1;
                }
                (true, false) => labels[[row, col]] = up,
                (false, true) => labels[[row, col]] = left,
                (true, true) => {
                    let smaller = up.min(left);
                    let larger = up.max(left);
                    labels[[row, col]] = smaller;
                    if smaller != larger {
                        union(&mut parent, smaller, larger);
                    }
                }
            }
        }
    }

    for i in 1..next_label as usize {
        parent[i] = find(&parent, i as u32);
    }
    labels.mapv_inplace(|l| if l == 0 { 0 } else { parent[l as usize] });
    labels
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}
