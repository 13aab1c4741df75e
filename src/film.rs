//! 浮動小数点の画像バッファ。蓄積バッファとフレームバッファの両方に使う。
//! 入出力は `image` クレート（PNG/JPEG/HDR のデコード、PNG エンコード）。

use std::fs;
use std::path::Path;

use image::{ImageBuffer, Rgb};
use log::info;
use thiserror::Error;

use crate::math::Color;

#[derive(Debug, Error)]
pub enum FilmError {
    #[error("image I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
    #[error("cannot encode a {0}-channel buffer as RGB")]
    UnsupportedChannelCount(usize),
}

/// width × height × channels の float 画素列（行は下から上、左→右）。
#[derive(Clone, Debug, Default)]
pub struct Film {
    width: usize,
    height: usize,
    channels: usize,
    pixels: Vec<f32>,
}

impl Film {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            pixels: vec![0.0; width * height * channels],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0.0);
    }

    #[inline]
    fn offset(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        (x + y * self.width) * self.channels
    }

    #[inline]
    pub fn rgb(&self, x: usize, y: usize) -> Color {
        let i = self.offset(x, y);
        Color::new(self.pixels[i], self.pixels[i + 1], self.pixels[i + 2])
    }

    #[inline]
    pub fn set_rgb(&mut self, x: usize, y: usize, color: Color) {
        let i = self.offset(x, y);
        self.pixels[i] = color.x;
        self.pixels[i + 1] = color.y;
        self.pixels[i + 2] = color.z;
    }

    #[inline]
    pub fn add_rgb(&mut self, x: usize, y: usize, color: Color) {
        let i = self.offset(x, y);
        self.pixels[i] += color.x;
        self.pixels[i + 1] += color.y;
        self.pixels[i + 2] += color.z;
    }

    pub fn tone_mapping(value: f32) -> f32 {
        value.clamp(0.0, 1.0)
    }

    pub fn gamma_correction(value: f32, gamma: f32) -> f32 {
        value.powf(1.0 / gamma)
    }

    /// 表示用の補正（トーンマップ + ガンマ 2.2）。
    pub fn apply_correction(color: Color) -> Color {
        Color::new(
            Self::gamma_correction(Self::tone_mapping(color.x), 2.2),
            Self::gamma_correction(Self::tone_mapping(color.y), 2.2),
            Self::gamma_correction(Self::tone_mapping(color.z), 2.2),
        )
    }

    /// PNG/JPEG/HDR を読み込み、RGB の float バッファに変換する。
    pub fn load(path: &Path) -> Result<Self, FilmError> {
        let decoded = image::open(path)?.into_rgb32f();
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);
        info!("Loaded {}", path.display());
        Ok(Self {
            width,
            height,
            channels: 3,
            pixels: decoded.into_raw(),
        })
    }

    pub fn load_from_memory(bytes: &[u8]) -> Result<Self, FilmError> {
        let decoded = image::load_from_memory(bytes)?.into_rgb32f();
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);
        Ok(Self {
            width,
            height,
            channels: 3,
            pixels: decoded.into_raw(),
        })
    }

    /// 補正を掛けた 8bit PNG として保存する。保存時に上下を反転する
    /// （内部の行順は下から上なので、PNG の行順に合わせる）。
    pub fn save(&self, path: &Path) -> Result<(), FilmError> {
        if self.channels != 3 {
            return Err(FilmError::UnsupportedChannelCount(self.channels));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut buffer = Vec::with_capacity(self.width * self.height * 3);
        for y in 0..self.height {
            let src_row = self.height - 1 - y;
            for x in 0..self.width {
                let corrected = Self::apply_correction(self.rgb(x, src_row));
                buffer.push((255.0 * corrected.x) as u8);
                buffer.push((255.0 * corrected.y) as u8);
                buffer.push((255.0 * corrected.z) as u8);
            }
        }

        let encoded: ImageBuffer<Rgb<u8>, _> =
            ImageBuffer::from_raw(self.width as u32, self.height as u32, buffer)
                .expect("buffer size matches dimensions");
        encoded.save(path)?;
        info!("Saved \"{}\".", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_accessors_roundtrip() {
        let mut film = Film::new(4, 3, 3);
        film.set_rgb(2, 1, Color::new(0.1, 0.2, 0.3));
        film.add_rgb(2, 1, Color::new(0.1, 0.0, 0.1));
        let c = film.rgb(2, 1);
        assert!((c.x - 0.2).abs() < 1e-6);
        assert!((c.y - 0.2).abs() < 1e-6);
        assert!((c.z - 0.4).abs() < 1e-6);
        assert_eq!(film.rgb(0, 0), Color::ZERO);
    }

    #[test]
    fn correction_clamps_and_brightens() {
        let c = Film::apply_correction(Color::new(4.0, 0.25, -1.0));
        assert_eq!(c.x, 1.0);
        assert!(c.y > 0.25 && c.y < 1.0);
        assert_eq!(c.z, 0.0);
    }

    #[test]
    fn save_load_roundtrip_within_one_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.png");

        let (w, h) = (16, 8);
        let mut film = Film::new(w, h, 3);
        for y in 0..h {
            for x in 0..w {
                let v = (x + y * w) as f32 / (w * h) as f32;
                film.set_rgb(x, y, Color::new(v, 1.0 - v, 0.5 * v));
            }
        }
        film.save(&path).expect("save");

        let loaded = Film::load(&path).expect("load");
        assert_eq!(loaded.width(), w);
        assert_eq!(loaded.height(), h);

        // メモリ経由のデコードも同じ結果になる
        let bytes = fs::read(&path).expect("read bytes");
        let from_memory = Film::load_from_memory(&bytes).expect("decode");
        assert_eq!(from_memory.pixels(), loaded.pixels());
        for y in 0..h {
            for x in 0..w {
                // 保存時に上下反転しているので、読み戻しは行を入れ替えて比較
                let expected = Film::apply_correction(film.rgb(x, h - 1 - y));
                let got = loaded.rgb(x, y);
                for c in 0..3 {
                    let diff = (expected[c] - got[c]).abs();
                    assert!(diff <= 1.0 / 255.0 + 1e-4, "({}, {}) ch{}: {}", x, y, c, diff);
                }
            }
        }
    }

    #[test]
    fn save_rejects_non_rgb() {
        let dir = tempfile::tempdir().expect("tempdir");
        let film = Film::new(2, 2, 1);
        assert!(film.save(&dir.path().join("bad.png")).is_err());
    }
}
