use std::io::Write;

/// Convenient wrapper for going from io::Result to anyhow::Result while
/// keeping count of the bytes written. Short writes surface as errors.
pub fn wrap_write<W: Write>(writer: &mut W, buf: &[u8]) -> anyhow::Result<usize> {
    writer.write_all(buf)?;
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use std::io::BufWriter;

    use super::*;

    #[test]
    fn test_wrap_write() {
        let mut buffer = Vec::new();
        let mut writer = BufWriter::new(&mut buffer);
        let bytes_written = wrap_write(&mut writer, &42u32.to_le_bytes())
            .expect("Failed to write to in-memory buffer");
        assert_eq!(bytes_written, 4);
        drop(writer);
        assert_eq!(buffer, 42u32.to_le_bytes());
    }
}
