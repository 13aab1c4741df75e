//! 切断幾何分布（一側・両側）。MLT の双方向ミューテーションで
//! 削除・追加するパス長のサンプリングに使う。
//!
//! いずれも逆関数法でサンプリングする。`set_parameters` で範囲を設定してから
//! `sample` / `pdf` を呼ぶこと。

use rand::Rng;
use rand::distributions::Distribution;

/// pmf ∝ base^k（k ∈ [0, n]）の切断幾何分布。
#[derive(Clone, Debug)]
pub struct ClippedGeometric {
    base: f32,
    inv_log_base: f32,
    normalization: f32,
    inv_normalization: f32,
}

impl ClippedGeometric {
    pub fn new(base: f32) -> Self {
        Self {
            base,
            inv_log_base: 1.0 / base.log2(),
            normalization: 0.0,
            inv_normalization: 0.0,
        }
    }

    /// 上限 n を設定（サンプル値は [0, n] に収まる）。
    pub fn set_parameters(&mut self, n: i32) {
        self.normalization = 1.0 - self.base.powi(n + 1);
        self.inv_normalization = 1.0 / self.normalization;
    }

    pub fn pdf(&self, i: i32) -> f32 {
        (1.0 - self.base) * self.base.powi(i) * self.inv_normalization
    }
}

impl Distribution<i32> for ClippedGeometric {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        let mut u: f32 = rng.r#gen();
        u *= self.normalization;
        (((1.0 - u).log2() * self.inv_log_base).ceil() as i32 - 1).max(0)
    }
}

/// pmf ∝ base^|k−center|（k ∈ [left, right]）の両側切断幾何分布。
/// pdf の k=0 補正は片側分布と整合させるための歴史的な振る舞いで、
/// サンプラー側とは厳密には一致しない（呼び出し側の MH 比で相殺される前提）。
#[derive(Clone, Debug)]
pub struct TwoSidedClippedGeometric {
    base: f32,
    inv_log_base: f32,
    normalization: f32,
    inv_normalization: f32,
    offset: f32,
    left: i32,
    center: i32,
}

impl TwoSidedClippedGeometric {
    pub fn new(base: f32) -> Self {
        Self {
            base,
            inv_log_base: 1.0 / base.log2(),
            normalization: 0.0,
            inv_normalization: 0.0,
            offset: 0.0,
            left: 0,
            center: 0,
        }
    }

    pub fn set_parameters(&mut self, left: i32, center: i32, right: i32) {
        self.offset = self.base.powi(center - left + 1);
        self.normalization = 2.0 - self.offset - self.base.powi(right - center + 1);
        self.inv_normalization = 1.0 / self.normalization;
        self.left = left;
        self.center = center;
    }

    pub fn pdf(&self, i: i32) -> f32 {
        let mut result =
            (1.0 - self.base) * self.base.powi((i - self.center).abs()) * self.inv_normalization;
        if i == 0 {
            result *= 2.0;
        }
        result
    }
}

impl Distribution<i32> for TwoSidedClippedGeometric {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        let mut u: f32 = rng.r#gen();
        u *= self.normalization;
        u += self.offset;
        if u < 1.0 {
            (self.center - (u.log2() * self.inv_log_base).ceil() as i32 + 1).max(self.left)
        } else {
            (self.center + ((2.0 - u).log2() * self.inv_log_base).ceil() as i32 - 1).max(self.left)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Pcg32;

    #[test]
    fn clipped_pdf_sums_to_one() {
        let mut dist = ClippedGeometric::new(0.5);
        dist.set_parameters(9);
        let total: f32 = (0..=9).map(|i| dist.pdf(i)).sum();
        assert!((total - 1.0).abs() < 1e-5, "total = {}", total);
    }

    #[test]
    fn clipped_histogram_matches_pdf() {
        const DRAWS: usize = 1_000_000;
        let mut dist = ClippedGeometric::new(0.5);
        dist.set_parameters(9);
        let mut rng = Pcg32::new(7);
        let mut counts = [0u32; 10];
        for _ in 0..DRAWS {
            let k = dist.sample(&mut rng);
            assert!((0..=9).contains(&k));
            counts[k as usize] += 1;
        }
        for (i, &c) in counts.iter().enumerate() {
            let empirical = c as f32 / DRAWS as f32;
            assert!(
                (empirical - dist.pdf(i as i32)).abs() < 0.01,
                "bucket {}: {} vs {}",
                i,
                empirical,
                dist.pdf(i as i32)
            );
        }
    }

    #[test]
    fn two_sided_respects_bounds() {
        let mut dist = TwoSidedClippedGeometric::new(0.5);
        dist.set_parameters(0, 3, 8);
        let mut rng = Pcg32::new(11);
        let mut seen_below = 0u32;
        let mut seen_above = 0u32;
        for _ in 0..100_000 {
            let k = dist.sample(&mut rng);
            assert!((0..=8).contains(&k), "k = {}", k);
            if k < 3 {
                seen_below += 1;
            }
            if k > 3 {
                seen_above += 1;
            }
        }
        // 中央の両側に実際に質量がある
        assert!(seen_below > 0 && seen_above > 0);
    }

    #[test]
    fn two_sided_peaks_at_center() {
        let mut dist = TwoSidedClippedGeometric::new(0.5);
        dist.set_parameters(1, 4, 7);
        for i in 1..=7 {
            assert!(dist.pdf(i) > 0.0);
            if i != 4 {
                assert!(dist.pdf(4) >= dist.pdf(i));
            }
        }
    }
}
