use anyhow::{Context, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use std::fs;
use std::path::Path;

/// Decodes a PNG byte stream into an RGBA8 pixel buffer. Any bit depth a
/// standard decoder accepts is fine; everything is widened to RGBA8.
pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes).context("decode png")?;
    Ok(img.to_rgba8())
}

pub fn load_png(path: &Path) -> Result<RgbaImage> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    decode_png(&bytes).with_context(|| format!("decode {}", path.display()))
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .context("encode png")?;
    Ok(out)
}

/// Encodes and writes `img`, creating parent directories as needed.
pub fn save_png(path: &Path, img: &RgbaImage) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let bytes = encode_png(img)?;
    fs::write(path, bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_round_trip_preserves_pixels() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(2, 1, Rgba([0, 255, 0, 128]));
        let bytes = encode_png(&img).expect("encode");
        let back = decode_png(&bytes).expect("decode");
        assert_eq!(img, back);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_png(b"not a png at all").is_err());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("a/b/c.png");
        save_png(&path, &RgbaImage::new(1, 1)).expect("save");
        assert!(path.exists());
        let back = load_png(&path).expect("load");
        assert_eq!(back.dimensions(), (1, 1));
    }
}
