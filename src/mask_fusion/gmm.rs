//! Gaussian mixture density over 3-channel color samples
//!
//! Mixtures are fitted with expectation-maximisation starting from a seeded
//! k-means++ partition, so repeated fits of the same samples give the same
//! model. Each component carries a full covariance matrix; `REG_COVAR` is
//! added to every diagonal to keep degenerate clusters (all samples the same
//! color) invertible.

use nalgebra::{Cholesky, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::FusionError;

/// A color sample in channel space
pub type Color = Vector3<f64>;

const REG_COVAR: f64 = 1e-6;
const MAX_ITER: usize = 100;
const TOLERANCE: f64 = 1e-3;
const KMEANS_ITER: usize = 20;
const SEED: u64 = 0;
const LN_2PI: f64 = 1.837_877_066_409_345_3;

#[derive(Debug, Clone)]
struct Component {
    weight: f64,
    mean: Color,
    cholesky: Cholesky<f64, nalgebra::U3>,
    log_det: f64,
}

impl Component {
    fn new(weight: f64, mean: Color, covariance: Matrix3<f64>) -> Self {
        let cholesky = regularized_cholesky(covariance);
        let log_det = 2.0 * cholesky.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        Self {
            weight,
            mean,
            cholesky,
            log_det,
        }
    }

    /// ln(weight) + ln N(sample | mean, covariance)
    fn weighted_log_density(&self, sample: &Color) -> f64 {
        let diff = sample - self.mean;
        let mahalanobis = diff.dot(&self.cholesky.solve(&diff));
        self.weight.ln() - 0.5 * (3.0 * LN_2PI + self.log_det + mahalanobis)
    }
}

/// Adds growing diagonal loading until the covariance factorizes.
fn regularized_cholesky(covariance: Matrix3<f64>) -> Cholesky<f64, nalgebra::U3> {
    let mut loading = REG_COVAR;
    loop {
        let loaded = covariance + Matrix3::identity() * loading;
        if let Some(cholesky) = Cholesky::new(loaded) {
            return cholesky;
        }
        loading *= 10.0;
    }
}

/// A fitted Gaussian mixture model
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    components: Vec<Component>,
}

impl GaussianMixture {
    /// Fits a mixture with up to `n_components` components.
    ///
    /// When there are fewer samples than requested components the component
    /// count is reduced to the sample count.
    ///
    /// # Errors
    ///
    /// * `FusionError::DataInsufficiency` - When `samples` is empty
    /// * `FusionError::InvalidParameter` - When `n_components` is zero
    pub fn fit(samples: &[Color], n_components: usize) -> Result<Self, FusionError> {
        if n_components == 0 {
            return Err(FusionError::InvalidParameter(
                "mixture component count must be > 0".to_string(),
            ));
        }
        if samples.is_empty() {
            return Err(FusionError::DataInsufficiency {
                context: "mixture".to_string(),
                available: 0,
                required: 1,
            });
        }

        let k = n_components.min(samples.len());
        let mut responsibilities = kmeans_responsibilities(samples, k);
        let mut model = maximization_step(samples, &responsibilities);
        let mut lower_bound = f64::NEG_INFINITY;

        for _ in 0..MAX_ITER {
            let mean_log_likelihood = model.expectation_step(samples, &mut responsibilities);
            model = maximization_step(samples, &responsibilities);
            if (mean_log_likelihood - lower_bound).abs() < TOLERANCE {
                break;
            }
            lower_bound = mean_log_likelihood;
        }

        Ok(model)
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// Log-density of a single sample under the mixture.
    pub fn score_sample(&self, sample: &Color) -> f64 {
        let terms: Vec<f64> = self
            .components
            .iter()
            .map(|component| component.weighted_log_density(sample))
            .collect();
        log_sum_exp(&terms)
    }

    /// Log-density of every sample under the mixture.
    pub fn score_samples(&self, samples: &[Color]) -> Vec<f64> {
        samples.iter().map(|s| self.score_sample(s)).collect()
    }

    /// Fills `responsibilities` with posterior component memberships and
    /// returns the mean log-likelihood of the samples.
    fn expectation_step(&self, samples: &[Color], responsibilities: &mut [Vec<f64>]) -> f64 {
        let mut total = 0.0;
        for (sample, row) in samples.iter().zip(responsibilities.iter_mut()) {
            for (r, component) in row.iter_mut().zip(&self.components) {
                *r = component.weighted_log_density(sample);
            }
            let norm = log_sum_exp(row);
            total += norm;
            row.iter_mut().for_each(|r| *r = (*r - norm).exp());
        }
        total / samples.len() as f64
    }
}

fn maximization_step(samples: &[Color], responsibilities: &[Vec<f64>]) -> GaussianMixture {
    let k = responsibilities.first().map_or(0, Vec::len);
    let n = samples.len() as f64;

    let components = (0..k)
        .map(|j| {
            let nk = responsibilities.iter().map(|row| row[j]).sum::<f64>() + 10.0 * f64::EPSILON;
            let mean = samples
                .iter()
                .zip(responsibilities)
                .fold(Color::zeros(), |acc, (s, row)| acc + s * row[j])
                / nk;
            let covariance = samples
                .iter()
                .zip(responsibilities)
                .fold(Matrix3::zeros(), |acc, (s, row)| {
                    let diff = s - mean;
                    acc + diff * diff.transpose() * row[j]
                })
                / nk;
            Component::new(nk / n, mean, covariance)
        })
        .collect();

    GaussianMixture { components }
}

/// Hard k-means assignment as one-hot responsibilities.
fn kmeans_responsibilities(samples: &[Color], k: usize) -> Vec<Vec<f64>> {
    let mut centers = kmeans_plus_plus(samples, k);
    let mut labels = vec![0usize; samples.len()];

    for _ in 0..KMEANS_ITER {
        let mut changed = false;
        for (sample, label) in samples.iter().zip(labels.iter_mut()) {
            let nearest = nearest_center(sample, &centers).0;
            if nearest != *label {
                *label = nearest;
                changed = true;
            }
        }

        let mut sums = vec![Color::zeros(); k];
        let mut counts = vec![0usize; k];
        for (sample, &label) in samples.iter().zip(&labels) {
            sums[label] += sample;
            counts[label] += 1;
        }
        for ((center, sum), count) in centers.iter_mut().zip(sums).zip(counts) {
            if count > 0 {
                *center = sum / count as f64;
            }
        }

        if !changed {
            break;
        }
    }

    labels
        .into_iter()
        .map(|label| {
            let mut row = vec![0.0; k];
            row[label] = 1.0;
            row
        })
        .collect()
}

fn kmeans_plus_plus(samples: &[Color], k: usize) -> Vec<Color> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut centers = Vec::with_capacity(k);
    centers.push(samples[rng.gen_range(0..samples.len())]);

    while centers.len() < k {
        let distances: Vec<f64> = samples
            .iter()
            .map(|s| nearest_center(s, &centers).1)
            .collect();
        let total: f64 = distances.iter().sum();
        if total <= 0.0 {
            // Remaining samples coincide with existing centers.
            centers.push(samples[centers.len() % samples.len()]);
            continue;
        }

        let mut target = rng.gen::<f64>() * total;
        let mut chosen = samples.len() - 1;
        for (i, d) in distances.iter().enumerate() {
            target -= d;
            if target <= 0.0 {
                chosen = i;
                break;
            }
        }
        centers.push(samples[chosen]);
    }

    centers
}

fn nearest_center(sample: &Color, centers: &[Color]) -> (usize, f64) {
    centers
        .iter()
        .map(|c| (sample - c).norm_squared())
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, d)| {
            if d < best.1 {
                (i, d)
            } else {
                best
            }
        })
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
