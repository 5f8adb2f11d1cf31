use rand::rngs::OsRng;
use rand::RngCore;

/// Draws a signed jitter offset in `[-amplitude_ms, +amplitude_ms]` from the
/// operating system's CSPRNG.
///
/// A predictable generator here would hand an attacker the one thing the
/// normalizer is supposed to hide: with a modelable jitter stream, observed
/// totals can be de-noised back into true processing times. So this never
/// falls back to a seeded PRNG — if the entropy source fails, the error is
/// returned and the caller decides what failing open looks like.
pub fn secure_jitter(amplitude_ms: f64) -> Result<f64, rand::Error> {
    if amplitude_ms <= 0.0 {
        return Ok(0.0);
    }

    let mut bytes = [0u8; 4];
    OsRng.try_fill_bytes(&mut bytes)?;

    // u32 → [0, 1] → [-amplitude, +amplitude]
    let unit = u32::from_be_bytes(bytes) as f64 / u32::MAX as f64;
    Ok((unit - 0.5) * 2.0 * amplitude_ms)
}
