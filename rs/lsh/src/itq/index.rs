use std::collections::BTreeMap;
use std::marker::PhantomData;

use anyhow::{anyhow, Context, Result};
use log::debug;
use num_traits::AsPrimitive;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ItqLshConfig;
use crate::itq::builder::{ItqTableModel, ItqTrainer};
use crate::itq::reader::ItqLshReader;
use crate::itq::writer::ItqLshWriter;
use crate::scanner::Scanner;
use crate::vector::{VectorElement, VectorStorage};

const HASH_PROGRESS_INTERVAL: usize = 10_000;

/// Multi-table LSH index over binary codes learned by iterative quantization.
///
/// Each table hashes a vector by projecting it onto learned principal
/// directions, rotating, and summing a fixed random weight for every strictly
/// positive bit; the wrapped sum modulo `table_size` is the bucket id. Two
/// vectors with the same code always collide, near codes collide with high
/// probability.
pub struct ItqLsh<T: VectorElement> {
    pub(crate) config: ItqLshConfig,
    pub(crate) rnd: Vec<Vec<u32>>,
    pub(crate) models: Vec<ItqTableModel>,
    pub(crate) tables: Vec<BTreeMap<u32, Vec<u32>>>,
    rng: StdRng,

    _marker: PhantomData<T>,
}

impl<T: VectorElement> ItqLsh<T> {
    pub fn new(config: ItqLshConfig) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Like `new`, but with a fixed seed so that the random weights, the
    /// training subsamples and the learned rotations are reproducible.
    pub fn new_with_seed(config: ItqLshConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ItqLshConfig, rng: StdRng) -> Result<Self> {
        let mut index = Self {
            config: config.clone(),
            rnd: Vec::new(),
            models: Vec::new(),
            tables: Vec::new(),
            rng,
            _marker: PhantomData,
        };
        index.reset(config)?;
        Ok(index)
    }

    pub(crate) fn from_parts(
        config: ItqLshConfig,
        rnd: Vec<Vec<u32>>,
        models: Vec<ItqTableModel>,
        tables: Vec<BTreeMap<u32, Vec<u32>>>,
    ) -> Self {
        Self {
            config,
            rnd,
            models,
            tables,
            rng: StdRng::from_entropy(),
            _marker: PhantomData,
        }
    }

    /// Replace the parameter setting: drop all tables and models, then draw a
    /// fresh random weight per bit and table. Models are only rebuilt by a
    /// subsequent `train`.
    pub fn reset(&mut self, config: ItqLshConfig) -> Result<()> {
        config.validate()?;

        self.rnd.clear();
        for _ in 0..config.num_tables {
            let mut weights = Vec::with_capacity(config.num_bits);
            for _ in 0..config.num_bits {
                weights.push(self.rng.gen_range(0..config.table_size));
            }
            self.rnd.push(weights);
        }
        self.models = Vec::new();
        self.tables = vec![BTreeMap::new(); config.num_tables];
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &ItqLshConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.models.len() == self.config.num_tables
    }

    /// Fit the per-table projections and rotations from `data`. Each table
    /// draws its own subsample.
    pub fn train<S: VectorStorage<T> + ?Sized>(&mut self, data: &S) -> Result<()> {
        if data.num_features() != self.config.num_features {
            return Err(anyhow!(
                "Dataset dimension {} does not match configured dimension {}",
                data.num_features(),
                self.config.num_features
            ));
        }
        if self.config.num_training_samples > data.len() {
            return Err(anyhow!(
                "Cannot draw {} distinct training samples from {} vectors",
                self.config.num_training_samples,
                data.len()
            ));
        }

        let trainer = ItqTrainer::new(self.config.clone());
        let mut models = Vec::with_capacity(self.config.num_tables);
        for k in 0..self.config.num_tables {
            models.push(trainer.train_table(data, &mut self.rng)?);
            debug!("Trained table {}/{}", k + 1, self.config.num_tables);
        }
        self.models = models;
        Ok(())
    }

    /// Insert every row of `data` under its row index.
    pub fn hash<S: VectorStorage<T> + ?Sized>(&mut self, data: &S) -> Result<()> {
        for i in 0..data.len() {
            let vector = data
                .get(i as u32)
                .context("Row index out of bounds while hashing")?;
            self.insert(i as u32, vector);
            if (i + 1) % HASH_PROGRESS_INTERVAL == 0 {
                debug!("Hashed {}/{} vectors", i + 1, data.len());
            }
        }
        debug!("Finished hashing {} vectors", data.len());
        Ok(())
    }

    /// Append `key` to the matching bucket of every table. Inserting the same
    /// key twice yields duplicate candidates; there is no deduplication.
    pub fn insert(&mut self, key: u32, vector: &[T]) {
        for k in 0..self.config.num_tables {
            let hash_val = self.get_hash_val(k, vector);
            self.tables[k].entry(hash_val).or_default().push(key);
        }
    }

    /// Bucket id of `vector` in table `k`, always in `[0, table_size)`.
    /// A pure function of the table, the vector and the trained model.
    pub fn get_hash_val(&self, k: usize, vector: &[T]) -> u32 {
        assert!(
            self.is_trained(),
            "Index must be trained before hashing vectors"
        );
        debug_assert!(
            vector.len() == self.config.num_features,
            "Vector must have the same dimension as the index"
        );

        let num_features = self.config.num_features;
        let num_bits = self.config.num_bits;
        let model = &self.models[k];

        let mut projected = vec![0.0f32; num_bits];
        for (i, value) in projected.iter_mut().enumerate() {
            let direction = &model.pcs[i * num_features..(i + 1) * num_features];
            let mut acc = 0.0f32;
            for j in 0..num_features {
                acc += vector[j].as_() * direction[j];
            }
            *value = acc;
        }

        let mut sum: u32 = 0;
        for (i, &weight) in self.rnd[k].iter().enumerate() {
            let column = &model.omegas[i * num_bits..(i + 1) * num_bits];
            let mut product = 0.0f32;
            for j in 0..num_bits {
                product += projected[j] * column[j];
            }
            // Bits at exactly zero count as -1 and contribute no weight.
            if product > 0.0 {
                sum = sum.wrapping_add(weight);
            }
        }
        sum % self.config.table_size
    }

    /// Feed the scanner every candidate colliding with `vector` in at least
    /// one table, then let it build its result set. Candidates are emitted in
    /// bucket order per table, without cross-table deduplication.
    pub fn query<Sc: Scanner<T>>(&self, vector: &[T], scanner: &mut Sc) {
        scanner.reset(vector);
        for k in 0..self.config.num_tables {
            let hash_val = self.get_hash_val(k, vector);
            if let Some(bucket) = self.tables[k].get(&hash_val) {
                for &id in bucket {
                    scanner.visit(id);
                }
            }
        }
        scanner.finish();
    }

    /// Persist the index to a single binary file. Fails if the index has not
    /// been trained.
    pub fn save(&self, path: &str) -> Result<usize> {
        ItqLshWriter::new(path.to_string()).write(self)
    }

    /// Load an index previously written by `save`. The training iteration
    /// count is not persisted: a loaded index serves queries and insertions
    /// but cannot repeat the original training schedule.
    pub fn load(path: &str) -> Result<Self> {
        ItqLshReader::new(path.to_string()).read()
    }
}
