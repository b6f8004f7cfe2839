//! Huffman tables and the entropy-coded segment bit reader

use super::JpegError;

const LOOKAHEAD: u32 = 8;

/// Canonical Huffman table as defined by a DHT segment
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    /// `(length << 8) | symbol` for codes of at most 8 bits, 0 otherwise
    lookup: Vec<u16>,
    maxcode: [i32; 18],
    mincode: [i32; 17],
    valptr: [i32; 17],
    values: Vec<u8>,
}

impl HuffmanTable {
    /// Build from the 16 per-length code counts and the symbol list.
    pub fn new(counts: &[u8; 16], values: &[u8]) -> Result<Self, JpegError> {
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if total != values.len() || total > 256 {
            return Err(JpegError::Malformed(format!(
                "huffman table declares {} codes for {} symbols",
                total,
                values.len()
            )));
        }

        let mut lookup = vec![0u16; 1 << LOOKAHEAD];
        let mut maxcode = [-1i32; 18];
        let mut mincode = [0i32; 17];
        let mut valptr = [0i32; 17];

        let mut code: u32 = 0;
        let mut k = 0usize;
        for len in 1..=16usize {
            let count = counts[len - 1] as usize;
            if count > 0 {
                valptr[len] = k as i32;
                mincode[len] = code as i32;
                for _ in 0..count {
                    if code >= (1 << len) {
                        return Err(JpegError::Malformed("huffman code space overflow".into()));
                    }
                    if len as u32 <= LOOKAHEAD {
                        let spare = LOOKAHEAD - len as u32;
                        let base = (code << spare) as usize;
                        let entry = ((len as u16) << 8) | values[k] as u16;
                        lookup[base..base + (1 << spare)].fill(entry);
                    }
                    code += 1;
                    k += 1;
                }
                maxcode[len] = code as i32 - 1;
            }
            code <<= 1;
        }
        // Sentinel so the slow path always terminates
        maxcode[17] = i32::MAX;

        Ok(Self {
            lookup,
            maxcode,
            mincode,
            valptr,
            values: values.to_vec(),
        })
    }

    /// Decode one symbol.
    pub fn decode(&self, bits: &mut BitReader<'_>) -> Result<u8, JpegError> {
        bits.fill()?;
        let entry = self.lookup[bits.peek(LOOKAHEAD) as usize];
        if entry != 0 {
            bits.consume((entry >> 8) as u32);
            return Ok(entry as u8);
        }

        for len in (LOOKAHEAD + 1)..=16 {
            let code = bits.peek(len) as i32;
            if code <= self.maxcode[len as usize] {
                bits.consume(len);
                let idx = self.valptr[len as usize] + code - self.mincode[len as usize];
                return Ok(self.values[idx as usize]);
            }
        }
        Err(JpegError::Malformed("invalid huffman code".into()))
    }
}

/// Sign-extend an `s`-bit magnitude (F.2.2.1 EXTEND).
#[inline]
pub fn extend(value: u32, s: u32) -> i32 {
    if s == 0 {
        return 0;
    }
    let v = value as i32;
    if v < (1 << (s - 1)) {
        v - (1 << s) + 1
    } else {
        v
    }
}

/// Reads bits from an entropy-coded segment, undoing 0xFF00 stuffing.
///
/// Reaching a marker (or the end of data) feeds zero bits. Consuming more
/// than a register's worth of those is reported as truncation.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u64,
    bits: u32,
    marker: Option<u8>,
    padded: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos,
            acc: 0,
            bits: 0,
            marker: None,
            padded: 0,
        }
    }

    pub fn fill(&mut self) -> Result<(), JpegError> {
        while self.bits <= 56 {
            let byte = self.next_byte();
            self.acc |= (byte as u64) << (56 - self.bits);
            self.bits += 8;
        }
        if self.padded > 8 {
            return Err(JpegError::Truncated);
        }
        Ok(())
    }

    fn next_byte(&mut self) -> u8 {
        if self.marker.is_some() || self.pos >= self.data.len() {
            self.padded += 1;
            return 0;
        }
        let byte = self.data[self.pos];
        if byte != 0xFF {
            self.pos += 1;
            return byte;
        }

        // Skip fill bytes preceding a marker
        let mut next = self.pos + 1;
        while next < self.data.len() && self.data[next] == 0xFF {
            next += 1;
        }
        match self.data.get(next) {
            Some(0x00) => {
                self.pos = next + 1;
                0xFF
            }
            Some(&marker) => {
                self.pos = next - 1;
                self.marker = Some(marker);
                self.padded += 1;
                0
            }
            None => {
                self.pos = self.data.len();
                self.padded += 1;
                0
            }
        }
    }

    #[inline]
    pub fn peek(&self, n: u32) -> u32 {
        (self.acc >> (64 - n)) as u32
    }

    #[inline]
    pub fn consume(&mut self, n: u32) {
        self.acc <<= n;
        self.bits -= n;
    }

    /// Read `n` raw bits (n <= 16).
    pub fn receive(&mut self, n: u32) -> Result<u32, JpegError> {
        if n == 0 {
            return Ok(0);
        }
        self.fill()?;
        let value = self.peek(n);
        self.consume(n);
        Ok(value)
    }

    /// Discard buffered bits and step over the next RSTn marker.
    pub fn restart(&mut self) -> Result<(), JpegError> {
        if self.marker.is_none() {
            while self.pos + 1 < self.data.len() {
                let (a, b) = (self.data[self.pos], self.data[self.pos + 1]);
                if a == 0xFF && b != 0x00 && b != 0xFF {
                    self.marker = Some(b);
                    break;
                }
                self.pos += 1;
            }
        }
        match self.marker {
            Some(m) if (0xD0..=0xD7).contains(&m) => {
                self.pos += 2;
                self.acc = 0;
                self.bits = 0;
                self.marker = None;
                self.padded = 0;
                Ok(())
            }
            Some(m) => Err(JpegError::Malformed(format!(
                "expected restart marker, found 0xFF{:02X}",
                m
            ))),
            None => Err(JpegError::Truncated),
        }
    }

    /// Position of the marker that ends this segment.
    pub fn finish(mut self) -> usize {
        if self.marker.is_none() {
            while self.pos + 1 < self.data.len() {
                let b = self.data[self.pos + 1];
                if self.data[self.pos] == 0xFF
                    && b != 0x00
                    && b != 0xFF
                    && !(0xD0..=0xD7).contains(&b)
                {
                    break;
                }
                self.pos += 1;
            }
        }
        self.pos
    }
}
