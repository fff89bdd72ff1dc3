use anyhow::{anyhow, Context, Result};
use ndarray::{s, Array2, Axis};
use ndarray_linalg::{Eigh, SVD, UPLO};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use num_traits::AsPrimitive;
use rand::Rng;

use crate::config::ItqLshConfig;
use crate::vector::{VectorElement, VectorStorage};

/// Learned projection for one hash table, stored transposed for the hash
/// loop: row `i` of `pcs` is the i-th principal direction (length D), row `i`
/// of `omegas` is the i-th column of the rotation (length N).
#[derive(Debug, Clone, PartialEq)]
pub struct ItqTableModel {
    pub pcs: Vec<f32>,
    pub omegas: Vec<f32>,
}

/// Fits per-table models: PCA of a random subsample, then an orthogonal
/// rotation refined by iterative quantization.
///
/// For more information on iterative quantization, see
///
///     Gong Y, Lazebnik S, Gordo A, et al. Iterative quantization: A
///     procrustean approach to learning binary codes for large-scale image
///     retrieval. IEEE TPAMI, 2013.
pub struct ItqTrainer {
    config: ItqLshConfig,
}

impl ItqTrainer {
    pub fn new(config: ItqLshConfig) -> Self {
        Self { config }
    }

    /// Train the model for a single table from a fresh subsample of `data`.
    pub fn train_table<T: VectorElement, S: VectorStorage<T> + ?Sized, R: Rng>(
        &self,
        data: &S,
        rng: &mut R,
    ) -> Result<ItqTableModel> {
        let num_features = self.config.num_features;
        let num_bits = self.config.num_bits;

        let samples = self.sample_rows(data, rng)?;
        let pca = self.principal_components(&samples)?;

        // The projection uses the uncentered sample; centering only shapes
        // the covariance. Queries are projected uncentered as well, so the
        // rotation is calibrated for this distribution.
        let projected = samples.dot(&pca);
        let rotation = self.refine_rotation(&projected, self.initial_rotation(rng)?)?;

        let mut pcs = vec![0.0f32; num_bits * num_features];
        for i in 0..num_bits {
            for j in 0..num_features {
                pcs[i * num_features + j] = pca[(j, i)];
            }
        }
        let mut omegas = vec![0.0f32; num_bits * num_bits];
        for i in 0..num_bits {
            for j in 0..num_bits {
                omegas[i * num_bits + j] = rotation[(j, i)];
            }
        }
        Ok(ItqTableModel { pcs, omegas })
    }

    /// Draw `num_training_samples` distinct rows, uniformly without
    /// replacement, as an S x D matrix. Indices are sorted ascending so the
    /// sample matrix is built in a deterministic row order.
    fn sample_rows<T: VectorElement, S: VectorStorage<T> + ?Sized, R: Rng>(
        &self,
        data: &S,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        let num_samples = self.config.num_training_samples;
        let num_features = self.config.num_features;
        if num_samples > data.len() {
            return Err(anyhow!(
                "Cannot draw {} distinct training samples from {} vectors",
                num_samples,
                data.len()
            ));
        }

        let mut indices = rand::seq::index::sample(rng, data.len(), num_samples).into_vec();
        indices.sort_unstable();

        let mut samples = Array2::<f32>::zeros((num_samples, num_features));
        for (row, &idx) in indices.iter().enumerate() {
            let vector = data
                .get(idx as u32)
                .context("Sampled row index out of bounds")?;
            for (col, value) in vector.iter().enumerate() {
                samples[(row, col)] = value.as_();
            }
        }
        Ok(samples)
    }

    /// Leading principal directions of the centered sample covariance, as a
    /// D x N matrix with one direction per column.
    fn principal_components(&self, samples: &Array2<f32>) -> Result<Array2<f32>> {
        let num_features = self.config.num_features;
        let num_bits = self.config.num_bits;

        let mean = samples
            .mean_axis(Axis(0))
            .context("Training sample is empty")?;
        let centered = samples - &mean;
        let covariance = centered.t().dot(&centered) / (samples.nrows() as f32 - 1.0);

        // Eigenvalues come back in ascending order, so the strongest
        // directions are the rightmost columns.
        let (_eigenvalues, eigenvectors) = covariance.eigh(UPLO::Upper)?;
        Ok(eigenvectors
            .slice(s![.., num_features - num_bits..])
            .to_owned())
    }

    /// A random orthogonal N x N matrix: the left singular vectors of an
    /// i.i.d. standard normal matrix.
    fn initial_rotation<R: Rng>(&self, rng: &mut R) -> Result<Array2<f32>> {
        let num_bits = self.config.num_bits;
        let gaussian: Array2<f32> = Array2::random_using((num_bits, num_bits), StandardNormal, rng);
        let (u, _sigma, _) = gaussian.svd(true, false)?;
        u.context("SVD did not produce left singular vectors")
    }

    /// Alternate between quantizing the projected sample to sign codes and
    /// re-solving the rotation in closed form (Orthogonal Procrustes).
    fn refine_rotation(
        &self,
        projected: &Array2<f32>,
        mut rotation: Array2<f32>,
    ) -> Result<Array2<f32>> {
        for _ in 0..self.config.max_iteration {
            let rotated = projected.dot(&rotation);
            // sign(0) maps to -1: only strictly positive entries become +1.
            let codes = rotated.mapv(|value| if value > 0.0 { 1.0f32 } else { -1.0 });

            let alignment = codes.t().dot(projected);
            let (u, _sigma, vt) = alignment.svd(true, true)?;
            let u = u.context("SVD did not produce left singular vectors")?;
            let vt = vt.context("SVD did not produce right singular vectors")?;
            rotation = vt.t().dot(&u.t());
        }
        Ok(rotation)
    }
}
