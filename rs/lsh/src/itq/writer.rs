use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{anyhow, Context, Result};
use utils::io::wrap_write;

use crate::itq::index::ItqLsh;
use crate::vector::VectorElement;

/// Writes an index as a single packed little-endian file.
///
/// Layout: a `u32` header (table size, table count, dimension, code length,
/// training sample size), then per table the random weights, the populated
/// buckets as `(bucket_id, length, ids...)` runs in ascending bucket order,
/// and the interleaved projection and rotation rows. The training iteration
/// count is not part of the persisted state.
pub struct ItqLshWriter {
    path: String,
}

impl ItqLshWriter {
    pub fn new(path: String) -> Self {
        Self { path }
    }

    pub fn write<T: VectorElement>(&self, index: &ItqLsh<T>) -> Result<usize> {
        if !index.is_trained() {
            return Err(anyhow!("Index must be trained before saving"));
        }

        let config = index.config();
        let num_tables = config.num_tables;
        let num_features = config.num_features;
        let num_bits = config.num_bits;

        let mut file = File::create(&self.path)
            .with_context(|| format!("Failed to create index file {}", self.path))?;
        let mut writer = BufWriter::new(&mut file);

        let mut bytes_written = wrap_write(&mut writer, &config.table_size.to_le_bytes())?;
        bytes_written += wrap_write(&mut writer, &(num_tables as u32).to_le_bytes())?;
        bytes_written += wrap_write(&mut writer, &(num_features as u32).to_le_bytes())?;
        bytes_written += wrap_write(&mut writer, &(num_bits as u32).to_le_bytes())?;
        bytes_written += wrap_write(
            &mut writer,
            &(config.num_training_samples as u32).to_le_bytes(),
        )?;

        for k in 0..num_tables {
            for &weight in &index.rnd[k] {
                bytes_written += wrap_write(&mut writer, &weight.to_le_bytes())?;
            }

            let table = &index.tables[k];
            bytes_written += wrap_write(&mut writer, &(table.len() as u32).to_le_bytes())?;
            // BTreeMap iteration emits the buckets in ascending key order.
            for (bucket_id, ids) in table {
                bytes_written += wrap_write(&mut writer, &bucket_id.to_le_bytes())?;
                bytes_written += wrap_write(&mut writer, &(ids.len() as u32).to_le_bytes())?;
                for &id in ids {
                    bytes_written += wrap_write(&mut writer, &id.to_le_bytes())?;
                }
            }

            let model = &index.models[k];
            for i in 0..num_bits {
                for &value in &model.pcs[i * num_features..(i + 1) * num_features] {
                    bytes_written += wrap_write(&mut writer, &value.to_le_bytes())?;
                }
                for &value in &model.omegas[i * num_bits..(i + 1) * num_bits] {
                    bytes_written += wrap_write(&mut writer, &value.to_le_bytes())?;
                }
            }
        }
        writer.flush()?;

        let expected_bytes_written = Self::expected_size(index);
        if bytes_written != expected_bytes_written {
            return Err(anyhow!(
                "Expected to write {} bytes in index file, but wrote {}",
                expected_bytes_written,
                bytes_written,
            ));
        }
        Ok(bytes_written)
    }

    fn expected_size<T: VectorElement>(index: &ItqLsh<T>) -> usize {
        let config = index.config();
        let u32_size = std::mem::size_of::<u32>();
        let f32_size = std::mem::size_of::<f32>();

        let mut expected = 5 * u32_size;
        for k in 0..config.num_tables {
            expected += config.num_bits * u32_size;
            expected += u32_size;
            for ids in index.tables[k].values() {
                expected += 2 * u32_size + ids.len() * u32_size;
            }
            expected += config.num_bits * (config.num_features + config.num_bits) * f32_size;
        }
        expected
    }
}
