//! Compression policies for the index integer streams.
//!
//! A policy turns a run of `u32` values into a run of 32-bit words and back.
//! Policies are selected by name; the meta file records the exact name used
//! for each stream (doc-id gaps, frequencies, positions, block headers) and
//! the reader refuses to open an index whose names it does not know.
//!
//! Policies with a non-zero `block_size` only accept input whose length is a
//! multiple of that block size; callers pad with zeros and account for the
//! padding upstream.

mod pfor;
mod rice;
mod s16;
mod vbyte;

use crate::error::{Error, Result};

/// A named compression policy for `u32` streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingPolicy {
    /// Identity: words are copied through untouched.
    Null,
    /// Variable-byte, padded to a word boundary.
    VByte,
    /// Simple-16: 28 payload bits per word, 16 packing shapes.
    S16,
    /// Rice coding with a per-run parameter word.
    Rice,
    /// Rice with all unary quotients grouped ahead of the binary remainders.
    TurboRice,
    /// PForDelta over fixed 128-integer blocks with patched exceptions.
    PFor,
}

impl CodingPolicy {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "null" => Ok(CodingPolicy::Null),
            "vbyte" => Ok(CodingPolicy::VByte),
            "s16" => Ok(CodingPolicy::S16),
            "rice" => Ok(CodingPolicy::Rice),
            "turbo-rice" => Ok(CodingPolicy::TurboRice),
            "pfor" => Ok(CodingPolicy::PFor),
            _ => Err(Error::UnknownCoding(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodingPolicy::Null => "null",
            CodingPolicy::VByte => "vbyte",
            CodingPolicy::S16 => "s16",
            CodingPolicy::Rice => "rice",
            CodingPolicy::TurboRice => "turbo-rice",
            CodingPolicy::PFor => "pfor",
        }
    }

    /// Required input granularity in integers; 0 means any length.
    pub fn block_size(&self) -> usize {
        match self {
            CodingPolicy::PFor => pfor::PFOR_BLOCK_SIZE,
            _ => 0,
        }
    }

    /// Encode `input` (already padded for block-wise policies), appending
    /// words to `output`. Returns the number of words appended.
    pub fn encode(&self, input: &[u32], output: &mut Vec<u32>) -> usize {
        debug_assert!(self.block_size() == 0 || input.len() % self.block_size() == 0);
        let start = output.len();
        match self {
            CodingPolicy::Null => output.extend_from_slice(input),
            CodingPolicy::VByte => vbyte::encode(input, output),
            CodingPolicy::S16 => s16::encode(input, output),
            CodingPolicy::Rice => rice::encode(input, output, false),
            CodingPolicy::TurboRice => rice::encode(input, output, true),
            CodingPolicy::PFor => pfor::encode(input, output),
        }
        output.len() - start
    }

    /// Decode `n` values (the padded count for block-wise policies) from
    /// `input` into `output`. Returns the number of words consumed.
    /// `output` must hold at least `n` values.
    pub fn decode(&self, input: &[u32], output: &mut [u32], n: usize) -> Result<usize> {
        debug_assert!(self.block_size() == 0 || n % self.block_size() == 0);
        if n == 0 {
            return Ok(0);
        }
        match self {
            CodingPolicy::Null => {
                if input.len() < n {
                    return Err(truncated());
                }
                output[..n].copy_from_slice(&input[..n]);
                Ok(n)
            }
            CodingPolicy::VByte => vbyte::decode(input, output, n),
            CodingPolicy::S16 => s16::decode(input, output, n),
            CodingPolicy::Rice => rice::decode(input, output, n, false),
            CodingPolicy::TurboRice => rice::decode(input, output, n, true),
            CodingPolicy::PFor => pfor::decode(input, output, n),
        }
    }
}

/// Length of `n` values padded up to the policy's block granularity.
pub fn padded_len(n: usize, block_size: usize) -> usize {
    if block_size == 0 {
        n
    } else {
        n.div_ceil(block_size) * block_size
    }
}

pub(crate) fn truncated() -> Error {
    Error::Format("compressed stream truncated".to_string())
}

/// LSB-first bit writer over a word stream.
pub(crate) struct BitWriter<'a> {
    out: &'a mut Vec<u32>,
    curr: u64,
    filled: u32,
}

impl<'a> BitWriter<'a> {
    pub fn new(out: &'a mut Vec<u32>) -> Self {
        Self {
            out,
            curr: 0,
            filled: 0,
        }
    }

    pub fn put(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return;
        }
        let masked = if bits == 32 {
            value as u64
        } else {
            (value as u64) & ((1u64 << bits) - 1)
        };
        self.curr |= masked << self.filled;
        self.filled += bits;
        while self.filled >= 32 {
            self.out.push(self.curr as u32);
            self.curr >>= 32;
            self.filled -= 32;
        }
    }

    pub fn put_unary(&mut self, q: u32) {
        for _ in 0..q {
            self.put(1, 1);
        }
        self.put(0, 1);
    }

    pub fn finish(mut self) {
        if self.filled > 0 {
            self.out.push(self.curr as u32);
        }
    }
}

/// LSB-first bit reader over a word stream.
pub(crate) struct BitReader<'a> {
    input: &'a [u32],
    word: usize,
    bit: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(input: &'a [u32]) -> Self {
        Self {
            input,
            word: 0,
            bit: 0,
        }
    }

    pub fn get(&mut self, bits: u32) -> Result<u32> {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return Ok(0);
        }
        let mut value = 0u64;
        let mut got = 0u32;
        while got < bits {
            let w = *self.input.get(self.word).ok_or_else(truncated)?;
            let avail = 32 - self.bit;
            let take = avail.min(bits - got);
            let chunk = ((w >> self.bit) as u64) & ((1u64 << take) - 1);
            value |= chunk << got;
            got += take;
            self.bit += take;
            if self.bit == 32 {
                self.bit = 0;
                self.word += 1;
            }
        }
        Ok(value as u32)
    }

    pub fn get_unary(&mut self) -> Result<u32> {
        let mut q = 0;
        while self.get(1)? == 1 {
            q += 1;
        }
        Ok(q)
    }

    /// Number of whole words consumed so far (partial words count as one).
    pub fn words_consumed(&self) -> usize {
        self.word + if self.bit > 0 { 1 } else { 0 }
    }
}

/// Bits needed to represent `max_val`.
pub(crate) fn bits_needed(max_val: u32) -> u32 {
    if max_val == 0 {
        0
    } else {
        32 - max_val.leading_zeros()
    }
}
