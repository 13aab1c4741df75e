//! 軽量な擬似乱数生成器（pcg32_fast 系）。レンダラ用の高速・十分な品質。
//! 参考: O'Neill, "PCG: A Family of Simple Fast Space-Efficient Statistically Good Algorithms".
//!
//! ワーカースレッドごとに 1 個の [`Pcg32`] を持ち、引数として明示的に引き回す。
//! [`rand::RngCore`] を実装しているので、`WeightedIndex` などの分布とも組み合わせられる。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

const MULTIPLIER: u64 = 6364136223846793005;

#[derive(Clone, Debug)]
pub struct Pcg32 {
    // MCG のため奇数を維持する
    state: u64,
}

impl Pcg32 {
    /// seed から生成（内部状態は奇数に正規化される）。
    pub fn new(seed: u64) -> Self {
        Self { state: seed | 1 }
    }

    /// 非決定的なシードで生成。ワーカーごとの既定の初期化。
    pub fn from_entropy() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(splitmix64(nanos ^ unique.wrapping_mul(0x9E3779B97F4A7C15)))
    }

    /// 32bit 乱数。
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        let count = (x >> 61) as u32;
        self.state = x.wrapping_mul(MULTIPLIER);
        x ^= x >> 22;
        (x >> (22 + count)) as u32
    }

    /// [0,1) の一様乱数（24bit 精度）。
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        const SCALE: f32 = 1.0 / (1u32 << 24) as f32;
        (self.next_u32() >> 8) as f32 * SCALE
    }
}

impl RngCore for Pcg32 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        Pcg32::next_u32(self)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let hi = Pcg32::next_u32(self) as u64;
        let lo = Pcg32::next_u32(self) as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = Pcg32::next_u32(self).to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// 64bit の簡易ハッシュ（SplitMix64）。シード拡散に使用。
#[inline]
pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_f32_is_in_unit_interval() {
        let mut rng = Pcg32::new(12345);
        for _ in 0..100_000 {
            let u = rng.next_f32();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Pcg32::new(42);
        let mut b = Pcg32::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn output_spans_buckets_uniformly() {
        // 16 バケットの χ² 検定（自由度 15、ゆるい閾値）。
        const DRAWS: u64 = 1_000_000;
        const BUCKETS: usize = 16;
        let mut counts = [0u64; BUCKETS];
        let mut rng = Pcg32::new(0xDEADBEEF);
        for _ in 0..DRAWS {
            counts[(rng.next_u32() >> 28) as usize] += 1;
        }
        let expected = DRAWS as f64 / BUCKETS as f64;
        let chi2: f64 = counts
            .iter()
            .map(|&c| {
                let d = c as f64 - expected;
                d * d / expected
            })
            .sum();
        // p < 0.001 で棄却される値よりかなり手前
        assert!(chi2 < 60.0, "chi2 = {}", chi2);
        assert!(counts.iter().all(|&c| c > 0));
    }

    #[test]
    fn splitmix_spreads_nearby_seeds() {
        let a = splitmix64(1);
        let b = splitmix64(2);
        assert_ne!(a, b);
        assert!((a ^ b).count_ones() > 8);
    }
}
