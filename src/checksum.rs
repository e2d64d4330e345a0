use crate::band::RasterBand;
use crate::error::Result;

const PRIMES: [u32; 11] = [7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43];

/// Classic 16-bit raster checksum of a whole band.
///
/// Rows are walked top to bottom; each sample is reduced modulo a prime
/// that cycles over pixels and accumulated into a 16-bit sum. Floating
/// samples are rounded first; NaN and infinities count as zero.
pub fn checksum(band: &RasterBand) -> Result<u32> {
    let (width, height) = band.size();
    if width == 0 || height == 0 {
        return Ok(0);
    }
    let integer = band.data_type().is_integer();
    let mut sum: u32 = 0;
    let mut prime_idx = 0usize;

    for y in 0..height {
        let row = band.read_window(0, y, width, 1)?;
        for &v in row.iter() {
            let value = if integer {
                v as i64
            } else if v.is_finite() {
                (v + 0.5).floor() as i64
            } else {
                0
            };
            // Truncating remainder: negative samples subtract.
            let prime = PRIMES[prime_idx] as i64;
            sum = ((sum as i64 + value % prime) & 0xFFFF) as u32;
            prime_idx = (prime_idx + 1) % PRIMES.len();
        }
    }

    Ok(sum)
}
