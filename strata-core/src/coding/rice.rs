//! Rice coding. One parameter word carries the remainder width `k`, chosen
//! from the mean of the run and clamped so no quotient exceeds 63 unary
//! bits. The plain form interleaves quotient and remainder per value; the
//! "turbo" form writes all quotients first, then all remainders, which lets
//! the decoder stay in one mode per pass.

use crate::error::{Error, Result};

use super::{bits_needed, truncated, BitReader, BitWriter};

fn pick_k(input: &[u32]) -> u32 {
    let sum: u64 = input.iter().map(|&v| v as u64).sum();
    let mean = (sum / input.len() as u64).max(1);
    let mut k = bits_needed(mean.min(u32::MAX as u64) as u32).saturating_sub(1);
    let max = input.iter().copied().max().unwrap_or(0);
    // Bound the worst-case unary run.
    k = k.max(bits_needed(max).saturating_sub(6)).min(31);
    k
}

pub fn encode(input: &[u32], output: &mut Vec<u32>, grouped: bool) {
    let k = pick_k(input);
    output.push(k);
    let mut writer = BitWriter::new(output);
    if grouped {
        for &v in input {
            writer.put_unary(v >> k);
        }
        for &v in input {
            writer.put(v, k);
        }
    } else {
        for &v in input {
            writer.put_unary(v >> k);
            writer.put(v, k);
        }
    }
    writer.finish();
}

pub fn decode(input: &[u32], output: &mut [u32], n: usize, grouped: bool) -> Result<usize> {
    let k = *input.first().ok_or_else(truncated)?;
    if k > 31 {
        return Err(Error::Format("bad rice parameter".to_string()));
    }
    let mut reader = BitReader::new(&input[1..]);
    if grouped {
        for out in output[..n].iter_mut() {
            *out = reader.get_unary()? << k;
        }
        for out in output[..n].iter_mut() {
            *out |= reader.get(k)?;
        }
    } else {
        for out in output[..n].iter_mut() {
            let q = reader.get_unary()?;
            *out = (q << k) | reader.get(k)?;
        }
    }
    Ok(1 + reader.words_consumed())
}
