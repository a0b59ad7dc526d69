//! Sparse byte-addressed memory. Unwritten bytes read as zero.

use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct Memory {
    bytes: HashMap<u64, u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| {
                self.bytes
                    .get(&addr.wrapping_add(i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.bytes.insert(addr.wrapping_add(i as u64), b);
        }
    }

    /// Read `count` little-endian elements of `elem_bytes` each.
    pub fn read_elems(&self, addr: u64, elem_bytes: usize, count: usize) -> Vec<u64> {
        self.read(addr, elem_bytes * count)
            .chunks(elem_bytes)
            .map(|chunk| {
                chunk
                    .iter()
                    .rev()
                    .fold(0u64, |acc, &b| (acc << 8) | b as u64)
            })
            .collect()
    }

    /// Write little-endian elements of `elem_bytes` each, starting at `addr`.
    pub fn write_elems(&mut self, addr: u64, elem_bytes: usize, elems: &[u64]) {
        for (i, e) in elems.iter().enumerate() {
            let at = addr + (i * elem_bytes) as u64;
            self.write(at, &e.to_le_bytes()[..elem_bytes]);
        }
    }

    /// Number of bytes ever written.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_reads_zero() {
        let mem = Memory::new();
        assert_eq!(mem.read(0x1000, 3), vec![0, 0, 0]);
        assert!(mem.is_empty());
    }

    #[test]
    fn test_elements_round_trip() {
        let mut mem = Memory::new();
        mem.write_elems(0x40, 2, &[0xbeef, 0x1234, 7]);
        assert_eq!(mem.read(0x40, 2), vec![0xef, 0xbe]);
        assert_eq!(mem.read_elems(0x42, 2, 2), vec![0x1234, 7]);
        assert_eq!(mem.len(), 6);
    }
}
