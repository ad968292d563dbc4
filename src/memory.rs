// memory-facing side of the bus

use std::collections::HashMap;

use crate::common::Addr;

/// Backing store behind the bus. Always available, always answers.
pub trait Memory: Send {
    fn read(&mut self, addr: Addr, buf: &mut [u8]);
    fn write(&mut self, addr: Addr, data: &[u8]);
    /// uncounted read for inspection
    fn peek(&self, addr: Addr, buf: &mut [u8]);
}

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_BITS;

/// Sparse byte-addressed memory; bytes never written read as zero.
#[derive(Default)]
pub struct MainMemory {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE]>>,
    pub reads: u64,
    pub writes: u64,
}

impl MainMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn byte(&self, a: u64) -> u8 {
        self.pages
            .get(&(a >> PAGE_BITS))
            .map(|p| p[(a as usize) & (PAGE_SIZE - 1)])
            .unwrap_or(0)
    }

    fn byte_mut(&mut self, a: u64) -> &mut u8 {
        let page = self
            .pages
            .entry(a >> PAGE_BITS)
            .or_insert_with(|| Box::new([0; PAGE_SIZE]));
        &mut page[(a as usize) & (PAGE_SIZE - 1)]
    }
}

impl Memory for MainMemory {
    fn read(&mut self, addr: Addr, buf: &mut [u8]) {
        self.reads += 1;
        self.peek(addr, buf);
    }
    fn write(&mut self, addr: Addr, data: &[u8]) {
        self.writes += 1;
        for (i, b) in data.iter().enumerate() {
            *self.byte_mut(addr.0 + i as u64) = *b;
        }
    }
    fn peek(&self, addr: Addr, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.byte(addr.0 + i as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_bytes_read_zero() {
        let mut mem = MainMemory::new();
        let mut buf = [0xffu8; 8];
        mem.read(Addr(0x1234), &mut buf);
        assert_eq!(buf, [0; 8]);
        assert_eq!(mem.reads, 1);
    }

    #[test]
    fn writes_cross_pages() {
        let mut mem = MainMemory::new();
        let at = Addr(PAGE_SIZE as u64 - 2);
        mem.write(at, &[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        mem.peek(at, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!((mem.reads, mem.writes), (0, 1));
    }
}
