//! Shared helpers for kernel implementations.

use anyhow::{ensure, Result};
use bytemuck::Pod;

/// Decodes a byte slice into elements. Host buffers carry no alignment
/// guarantee, so every element is read unaligned.
pub fn read_elements<T: Pod>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() % size == 0,
        "byte length {} is not a multiple of element size {}",
        bytes.len(),
        size
    );
    Ok(bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

pub fn write_elements<T: Pod>(values: &[T], output: &mut [u8]) -> Result<()> {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    ensure!(
        bytes.len() == output.len(),
        "output holds {} bytes but kernel produced {}",
        output.len(),
        bytes.len()
    );
    output.copy_from_slice(bytes);
    Ok(())
}

/// Pads `bytes` up to the next multiple of `alignment`.
pub fn align_up(bytes: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return bytes;
    }
    bytes.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_from_unaligned_offset() {
        let values = [1.5f32, -2.0, 3.25];
        let mut storage = vec![0u8; 1];
        storage.extend_from_slice(bytemuck::cast_slice(&values));
        let decoded = read_elements::<f32>(&storage[1..]).expect("decode");
        assert_eq!(decoded, values);
    }

    #[test]
    fn rejects_ragged_input() {
        assert!(read_elements::<i32>(&[0u8; 6]).is_err());
    }

    #[test]
    fn write_checks_length() {
        let mut out = [0u8; 8];
        write_elements(&[7u32, 9], &mut out).expect("write");
        assert_eq!(read_elements::<u32>(&out).unwrap(), vec![7, 9]);
        assert!(write_elements(&[1u32], &mut out).is_err());
    }

    #[test]
    fn align_up_rounds_to_copy_alignment() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(8, 4), 8);
    }
}
