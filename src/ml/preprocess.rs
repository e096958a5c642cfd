//! 画像の前処理
//!
//! 学習時（ファイル）と推論時（アップロードのバイト列）で同じ変換を使う。
//! RGB に変換、正方形へリサイズ、0〜1 に縮小、(C, H, W) の順で平坦化。

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage};
use std::path::Path;

/// バイト列をデコードして正規化
///
/// 空のデータはデコードを試みずに拒否します。
pub fn decode_and_normalize(bytes: &[u8], image_size: usize) -> Result<Vec<f32>> {
    if bytes.is_empty() {
        anyhow::bail!("empty image data");
    }
    let img = image::load_from_memory(bytes).context("Failed to decode image")?;
    Ok(normalize(&img, image_size))
}

/// 画像ファイルを読み込んで正規化
pub fn load_and_normalize_image(path: &Path, image_size: usize) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read image: {}", path.display()))?;
    decode_and_normalize(&bytes, image_size)
        .with_context(|| format!("Invalid image: {}", path.display()))
}

fn normalize(img: &DynamicImage, image_size: usize) -> Vec<f32> {
    let side = image_size as u32;
    let rgb = img.resize_exact(side, side, FilterType::Nearest).to_rgb8();

    let mut data = Vec::with_capacity(3 * image_size * image_size);
    for channel in 0..3 {
        for pixel in rgb.pixels() {
            data.push(pixel[channel] as f32 / 255.0);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_channel_first_and_rescaled() {
        let data = decode_and_normalize(&png_bytes(5, 7, [255, 0, 51]), 4).unwrap();
        assert_eq!(data.len(), 3 * 4 * 4);

        // R チャネル -> G チャネル -> B チャネルの順
        assert!(data[..16].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(data[16..32].iter().all(|v| *v == 0.0));
        assert!(data[32..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_empty_bytes_rejected() {
        let err = decode_and_normalize(&[], 128).unwrap_err();
        assert!(err.to_string().contains("empty image data"));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(decode_and_normalize(b"this is not an image", 128).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pothole.png");
        std::fs::write(&path, png_bytes(20, 10, [0, 255, 0])).unwrap();

        let data = load_and_normalize_image(&path, 8).unwrap();
        assert_eq!(data.len(), 3 * 8 * 8);
        assert!(data[64..128].iter().all(|v| (*v - 1.0).abs() < 1e-6));

        assert!(load_and_normalize_image(&dir.path().join("missing.png"), 8).is_err());
    }
}
