//! K-means over standardised context vectors.
//!
//! The fitted clusters are only reported; nothing downstream reads them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Clusters fitted per learning pass
pub const CONTEXT_CLUSTERS: usize = 5;

/// Contexts needed before clustering is attempted
pub const MIN_CONTEXTS: usize = 10;

/// Most recent contexts clustered per pass
pub const CLUSTER_WINDOW: usize = 1000;

/// Per-feature mean and standard deviation
#[derive(Debug, Clone, Default)]
pub struct Scaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Scaler {
    pub fn fit(data: &[Vec<f64>]) -> Self {
        let Some(first) = data.first() else {
            return Self::default();
        };
        let n = data.len() as f64;
        let dims = first.len();

        let mut mean = vec![0.0; dims];
        for row in data {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in mean.iter_mut() {
            *m /= n;
        }

        let mut std = vec![0.0; dims];
        for row in data {
            for ((s, x), m) in std.iter_mut().zip(row).zip(&mean) {
                *s += (x - m) * (x - m);
            }
        }
        for s in std.iter_mut() {
            *s = (*s / n).sqrt();
            // constant feature
            if *s < f64::EPSILON {
                *s = 1.0;
            }
        }

        Self { mean, std }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

pub struct KMeans {
    k: usize,
    max_iter: usize,
    seed: u64,
    centroids: Vec<Vec<f64>>,
    assignments: Vec<usize>,
    inertia: f64,
    scaler: Scaler,
    fitted: bool,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 100,
            seed: 42,
            centroids: Vec::new(),
            assignments: Vec::new(),
            inertia: f64::INFINITY,
            scaler: Scaler::default(),
            fitted: false,
        }
    }

    /// Fit on raw (unscaled) rows. Fewer rows than clusters, or empty rows,
    /// leave the model unfitted.
    pub fn fit(&mut self, raw: &[Vec<f64>]) {
        self.fitted = false;
        if raw.len() < self.k || raw.first().map_or(true, |r| r.is_empty()) {
            return;
        }

        self.scaler = Scaler::fit(raw);
        let data: Vec<Vec<f64>> = raw.iter().map(|r| self.scaler.transform(r)).collect();
        let dims = data[0].len();

        self.centroids = self.init_centroids(&data);
        self.assignments = vec![usize::MAX; data.len()];

        for _ in 0..self.max_iter {
            let next: Vec<usize> = data.iter().map(|x| self.nearest(x)).collect();
            if next == self.assignments {
                break;
            }
            self.assignments = next;

            let mut sums = vec![vec![0.0; dims]; self.k];
            let mut counts = vec![0usize; self.k];
            for (x, &c) in data.iter().zip(&self.assignments) {
                counts[c] += 1;
                for (s, v) in sums[c].iter_mut().zip(x) {
                    *s += v;
                }
            }
            for (c, count) in counts.into_iter().enumerate() {
                // an empty cluster keeps its previous centroid
                if count > 0 {
                    self.centroids[c] = sums[c].iter().map(|s| s / count as f64).collect();
                }
            }
        }

        self.inertia = data
            .iter()
            .zip(&self.assignments)
            .map(|(x, &c)| distance_squared(x, &self.centroids[c]))
            .sum();
        self.fitted = true;
    }

    /// k-means++ seeding
    fn init_centroids(&self, data: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = Vec::with_capacity(self.k);
        centroids.push(data[rng.gen_range(0..data.len())].clone());

        while centroids.len() < self.k {
            let distances: Vec<f64> = data
                .iter()
                .map(|x| {
                    centroids
                        .iter()
                        .map(|c| distance_squared(x, c))
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();

            let total: f64 = distances.iter().sum();
            if total <= 0.0 {
                // every point already coincides with a centroid
                centroids.push(data[rng.gen_range(0..data.len())].clone());
                continue;
            }

            let target = rng.gen::<f64>() * total;
            let mut cumsum = 0.0;
            let mut chosen = data.len() - 1;
            for (i, d) in distances.iter().enumerate() {
                cumsum += d;
                if cumsum >= target {
                    chosen = i;
                    break;
                }
            }
            centroids.push(data[chosen].clone());
        }

        centroids
    }

    fn nearest(&self, x: &[f64]) -> usize {
        self.centroids
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                distance_squared(x, a)
                    .partial_cmp(&distance_squared(x, b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Cluster of a raw row
    pub fn predict(&self, raw: &[f64]) -> Option<usize> {
        if !self.fitted {
            return None;
        }
        Some(self.nearest(&self.scaler.transform(raw)))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn clusters(&self) -> usize {
        self.k
    }

    pub fn labels(&self) -> &[usize] {
        &self.assignments
    }

    /// Sum of squared distances in standardised space
    pub fn inertia(&self) -> Option<f64> {
        self.fitted.then_some(self.inertia)
    }
}

impl Default for KMeans {
    fn default() -> Self {
        Self::new(CONTEXT_CLUSTERS)
    }
}

fn distance_squared(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
