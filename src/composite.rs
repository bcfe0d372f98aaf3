use crate::engine::{FlipMode, Rect};
use glam::Vec2;
use image::RgbaImage;

/// Basis pair fed to the rotated blit when loading an override into a sheet.
/// The vectors encode the packer's coordinate convention and are fixed:
/// `Rot90` packs with (down, right), `Rot90Cw` with (up, left).
pub fn load_basis(flip: FlipMode) -> (Vec2, Vec2) {
    match flip {
        FlipMode::Rot90 => (Vec2::new(0.0, -1.0), Vec2::new(1.0, 0.0)),
        FlipMode::Rot90Cw => (Vec2::new(0.0, 1.0), Vec2::new(-1.0, 0.0)),
        FlipMode::None => (Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)),
    }
}

/// Inverse pairing used when reading a rotated sprite back out of a sheet
/// for dumping. Mirrors `load_basis` variant-for-variant.
pub fn dump_basis(flip: FlipMode) -> (Vec2, Vec2) {
    match flip {
        FlipMode::Rot90 => (Vec2::new(0.0, 1.0), Vec2::new(-1.0, 0.0)),
        FlipMode::Rot90Cw => (Vec2::new(0.0, -1.0), Vec2::new(1.0, 0.0)),
        FlipMode::None => (Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)),
    }
}

/// Converts a rect from sprite-sheet convention (y up from the bottom) into
/// top-down pixel-buffer rows. Both the load path and the dump path apply
/// this exactly once against the same top-down buffer; applying it twice
/// anywhere breaks the round trip.
pub fn flip_rect_y(rect: Rect, buffer_h: u32) -> Rect {
    Rect { y: buffer_h.saturating_sub(rect.y + rect.h), ..rect }
}

/// Draws `src` into `dst_rect` of `dst`, sampling through the 2x2 basis
/// (u, v). Destination pixels map to normalized source coordinates as
/// `s = fx * u + fy * v`, wrapped into [0, 1); identity basis is a plain
/// nearest-neighbour scale and is byte-exact when dimensions match.
pub fn draw_into(dst: &mut RgbaImage, src: &RgbaImage, dst_rect: Rect, basis: (Vec2, Vec2)) {
    if dst_rect.is_empty() || src.width() == 0 || src.height() == 0 {
        return;
    }
    let (u, v) = basis;
    let (src_w, src_h) = (src.width() as f32, src.height() as f32);
    for py in 0..dst_rect.h {
        let dy = dst_rect.y + py;
        if dy >= dst.height() {
            break;
        }
        let fy = (py as f32 + 0.5) / dst_rect.h as f32;
        for px in 0..dst_rect.w {
            let dx = dst_rect.x + px;
            if dx >= dst.width() {
                break;
            }
            let fx = (px as f32 + 0.5) / dst_rect.w as f32;
            let s = u * fx + v * fy;
            let sx = ((s.x.rem_euclid(1.0) * src_w) as u32).min(src.width() - 1);
            let sy = ((s.y.rem_euclid(1.0) * src_h) as u32).min(src.height() - 1);
            dst.put_pixel(dx, dy, *src.get_pixel(sx, sy));
        }
    }
}

/// Copies a sub-rectangle out of `src`. `rect` is in top-down row
/// coordinates; callers convert with `flip_rect_y` first.
pub fn extract_rect(src: &RgbaImage, rect: Rect) -> RgbaImage {
    let mut out = RgbaImage::new(rect.w, rect.h);
    for py in 0..rect.h {
        let sy = rect.y + py;
        if sy >= src.height() {
            break;
        }
        for px in 0..rect.w {
            let sx = rect.x + px;
            if sx >= src.width() {
                break;
            }
            out.put_pixel(px, py, *src.get_pixel(sx, sy));
        }
    }
    out
}

/// Reads a rotated sprite out of its sheet sub-image into a buffer of the
/// sprite's natural (unrotated) orientation, so dumped files always look
/// upright on disk. The output dimensions are the transposed rect.
pub fn rotate_for_dump(sub: &RgbaImage, flip: FlipMode) -> RgbaImage {
    let mut out = RgbaImage::new(sub.height(), sub.width());
    let rect = Rect::new(0, 0, sub.height(), sub.width());
    draw_into(&mut out, sub, rect, dump_basis(flip));
    out
}
