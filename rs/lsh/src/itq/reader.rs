use std::collections::BTreeMap;
use std::fs;

use anyhow::{anyhow, Context, Result};

use crate::config::ItqLshConfig;
use crate::itq::builder::ItqTableModel;
use crate::itq::index::ItqLsh;
use crate::vector::VectorElement;

/// Reads an index file produced by `ItqLshWriter`.
pub struct ItqLshReader {
    path: String,
}

impl ItqLshReader {
    pub fn new(path: String) -> Self {
        Self { path }
    }

    /// The training iteration count is not persisted, so it is restored as 0:
    /// a loaded index serves queries and insertions, but retraining it would
    /// run PCA with zero rotation-refinement sweeps.
    pub fn read<T: VectorElement>(&self) -> Result<ItqLsh<T>> {
        let buffer = fs::read(&self.path)
            .with_context(|| format!("Failed to read index file {}", self.path))?;
        let mut offset = 0usize;

        let table_size = read_u32(&buffer, &mut offset)?;
        let num_tables = read_u32(&buffer, &mut offset)? as usize;
        let num_features = read_u32(&buffer, &mut offset)? as usize;
        let num_bits = read_u32(&buffer, &mut offset)? as usize;
        let num_training_samples = read_u32(&buffer, &mut offset)? as usize;

        let config = ItqLshConfig {
            table_size,
            num_tables,
            num_features,
            num_bits,
            num_training_samples,
            max_iteration: 0,
        };
        config.validate()?;

        let mut rnd = Vec::with_capacity(num_tables);
        let mut models = Vec::with_capacity(num_tables);
        let mut tables = Vec::with_capacity(num_tables);
        for _ in 0..num_tables {
            let mut weights = Vec::with_capacity(num_bits);
            for _ in 0..num_bits {
                weights.push(read_u32(&buffer, &mut offset)?);
            }
            rnd.push(weights);

            let count = read_u32(&buffer, &mut offset)?;
            let mut table = BTreeMap::new();
            for _ in 0..count {
                let bucket_id = read_u32(&buffer, &mut offset)?;
                let length = read_u32(&buffer, &mut offset)? as usize;
                let mut ids = Vec::with_capacity(length);
                for _ in 0..length {
                    ids.push(read_u32(&buffer, &mut offset)?);
                }
                table.insert(bucket_id, ids);
            }
            tables.push(table);

            let mut pcs = Vec::with_capacity(num_bits * num_features);
            let mut omegas = Vec::with_capacity(num_bits * num_bits);
            for _ in 0..num_bits {
                for _ in 0..num_features {
                    pcs.push(read_f32(&buffer, &mut offset)?);
                }
                for _ in 0..num_bits {
                    omegas.push(read_f32(&buffer, &mut offset)?);
                }
            }
            models.push(ItqTableModel { pcs, omegas });
        }

        if offset != buffer.len() {
            return Err(anyhow!(
                "Index file has {} trailing bytes",
                buffer.len() - offset
            ));
        }
        Ok(ItqLsh::from_parts(config, rnd, models, tables))
    }
}

fn take<'a>(buffer: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *offset + len > buffer.len() {
        return Err(anyhow!("Index file truncated at offset {}", *offset));
    }
    let slice = &buffer[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

fn read_u32(buffer: &[u8], offset: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(take(buffer, offset, 4)?.try_into()?))
}

fn read_f32(buffer: &[u8], offset: &mut usize) -> Result<f32> {
    Ok(f32::from_le_bytes(take(buffer, offset, 4)?.try_into()?))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempdir::TempDir;
    use utils::test_utils::generate_random_vector_using;

    use super::*;
    use crate::itq::writer::ItqLshWriter;
    use crate::vector::InMemoryVectorStorage;

    fn populated_index() -> (ItqLsh<f32>, InMemoryVectorStorage<f32>) {
        let config = ItqLshConfig {
            table_size: 64,
            num_tables: 3,
            num_features: 12,
            num_bits: 6,
            num_training_samples: 80,
            max_iteration: 12,
        };
        let mut rng = StdRng::seed_from_u64(101);
        let mut storage = InMemoryVectorStorage::new(12);
        for _ in 0..200 {
            storage
                .append(&generate_random_vector_using(12, &mut rng))
                .expect("Vector should be appended");
        }
        let mut index = ItqLsh::<f32>::new_with_seed(config, 101).expect("Index should be created");
        index.train(&storage).expect("Training should succeed");
        index.hash(&storage).expect("Hashing should succeed");
        (index, storage)
    }

    #[test]
    fn test_save_load_round_trip_is_exact() {
        let temp_dir = TempDir::new("test_itq_lsh_reader_round_trip")
            .expect("Failed to create temporary directory");
        let path = temp_dir
            .path()
            .join("index")
            .to_str()
            .expect("Failed to convert temporary directory path to string")
            .to_string();

        let (index, _storage) = populated_index();
        ItqLshWriter::new(path.clone())
            .write(&index)
            .expect("Failed to write index");
        let loaded = ItqLshReader::new(path)
            .read::<f32>()
            .expect("Failed to read index file");

        assert_eq!(loaded.config().table_size, index.config().table_size);
        assert_eq!(loaded.config().num_tables, index.config().num_tables);
        assert_eq!(loaded.config().num_features, index.config().num_features);
        assert_eq!(loaded.config().num_bits, index.config().num_bits);
        assert_eq!(
            loaded.config().num_training_samples,
            index.config().num_training_samples
        );
        assert_eq!(loaded.config().max_iteration, 0);

        // Every weight, bucket (with insertion order) and model value must
        // survive the round trip bit-exactly.
        assert_eq!(loaded.rnd, index.rnd);
        assert_eq!(loaded.tables, index.tables);
        assert_eq!(loaded.models, index.models);
    }

    #[test]
    fn test_loaded_index_hashes_identically() {
        let temp_dir = TempDir::new("test_itq_lsh_reader_hashes")
            .expect("Failed to create temporary directory");
        let path = temp_dir
            .path()
            .join("index")
            .to_str()
            .expect("Failed to convert temporary directory path to string")
            .to_string();

        let (index, _storage) = populated_index();
        index.save(&path).expect("Failed to write index");
        let loaded = ItqLsh::<f32>::load(&path).expect("Failed to read index file");

        let mut rng = StdRng::seed_from_u64(33);
        for _ in 0..100 {
            let vector = generate_random_vector_using(12, &mut rng);
            for k in 0..index.config().num_tables {
                assert_eq!(loaded.get_hash_val(k, &vector), index.get_hash_val(k, &vector));
            }
        }
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let temp_dir = TempDir::new("test_itq_lsh_reader_truncated")
            .expect("Failed to create temporary directory");
        let path = temp_dir
            .path()
            .join("index")
            .to_str()
            .expect("Failed to convert temporary directory path to string")
            .to_string();

        let (index, _storage) = populated_index();
        ItqLshWriter::new(path.clone())
            .write(&index)
            .expect("Failed to write index");

        let buffer = fs::read(&path).expect("Failed to read index file");
        fs::write(&path, &buffer[..buffer.len() - 3]).expect("Failed to truncate index file");
        assert!(ItqLshReader::new(path).read::<f32>().is_err());
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let temp_dir = TempDir::new("test_itq_lsh_reader_trailing")
            .expect("Failed to create temporary directory");
        let path = temp_dir
            .path()
            .join("index")
            .to_str()
            .expect("Failed to convert temporary directory path to string")
            .to_string();

        let (index, _storage) = populated_index();
        ItqLshWriter::new(path.clone())
            .write(&index)
            .expect("Failed to write index");

        let mut buffer = fs::read(&path).expect("Failed to read index file");
        buffer.extend_from_slice(&[0u8; 2]);
        fs::write(&path, &buffer).expect("Failed to extend index file");
        assert!(ItqLshReader::new(path).read::<f32>().is_err());
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let reader = ItqLshReader::new("/nonexistent/index".to_string());
        assert!(reader.read::<f32>().is_err());
    }
}
