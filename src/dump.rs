use crate::codec;
use crate::composite;
use crate::engine::{short_material_name, FlipMode, Rect, SpriteCollection, StandaloneSprite};
use crate::paths::STANDALONE_DIR;
use crate::standalone::{clean_texture_name, is_family_texture};
use anyhow::Result;
use image::RgbaImage;
use std::path::{Path, PathBuf};

/// Exports resident pixel data to PNG override-layout trees. Dumps are
/// write-once: an existing file at a computed path is never overwritten, so
/// user edits under the dump roots survive repeated passes.
pub struct Dumper {
    dump_root: PathBuf,
    convert_root: PathBuf,
}

impl Dumper {
    pub fn new(dump_root: impl Into<PathBuf>, convert_root: impl Into<PathBuf>) -> Self {
        Self { dump_root: dump_root.into(), convert_root: convert_root.into() }
    }

    pub fn dump_root(&self) -> &Path {
        &self.dump_root
    }

    /// Writes every sprite of every material to
    /// `<root>/<collection>/<short-material>/<sprite>.png`. With `convert`
    /// set the converted root is used instead, which is how override sheets
    /// get split back into per-sprite files.
    pub fn dump_collection(&self, collection: &SpriteCollection, convert: bool) -> Result<()> {
        let base = if convert { &self.convert_root } else { &self.dump_root };
        for mat in &collection.materials {
            let sheet = &mat.image;
            if sheet.width() == 0 || sheet.height() == 0 {
                continue;
            }
            let short = short_material_name(&mat.name);
            for def in collection.sprites.iter().filter(|d| d.material == mat.name) {
                if def.name.is_empty() || def.rect.is_empty() {
                    continue;
                }
                let target = sprite_dump_path(base, &collection.name, short, &def.name);
                if target.exists() {
                    continue;
                }
                if let Err(err) = dump_sprite_from_sheet(sheet, def.rect, def.flip, &target) {
                    eprintln!(
                        "[dump] failed to write {}/{}/{}: {err:#}",
                        collection.name, short, def.name
                    );
                }
            }
        }
        Ok(())
    }

    /// Dumps one sprite of a collection to the dump root, write-once.
    pub fn dump_single_sprite(&self, collection: &SpriteCollection, sprite: &str) -> Result<()> {
        for def in collection.sprites.iter().filter(|d| d.name.as_ref() == sprite) {
            let Some(mat) = collection.materials.iter().find(|m| m.name == def.material) else {
                continue;
            };
            if mat.image.width() == 0 || mat.image.height() == 0 || def.rect.is_empty() {
                continue;
            }
            let short = short_material_name(&mat.name);
            let target = sprite_dump_path(&self.dump_root, &collection.name, short, sprite);
            if target.exists() {
                return Ok(());
            }
            return dump_sprite_from_sheet(&mat.image, def.rect, def.flip, &target);
        }
        Ok(())
    }

    /// Dumps a standalone sprite's pixels under `<root>/T2D/...`. Family
    /// sprites render through a transparent surface sized to exactly the
    /// sprite's rect, never the whole shared image; 1:1 textures are encoded
    /// whole.
    pub fn dump_standalone(&self, sprite: &StandaloneSprite) -> Result<()> {
        if sprite.rect.is_empty() {
            return Ok(());
        }
        if is_family_texture(&sprite.texture_name) {
            let family = clean_texture_name(&sprite.texture_name);
            let target = self
                .dump_root
                .join(STANDALONE_DIR)
                .join(&family)
                .join(format!("{}.png", sprite.name));
            if target.exists() {
                return Ok(());
            }
            let rows = composite::flip_rect_y(sprite.rect, sprite.image.height());
            let sub = composite::extract_rect(&sprite.image, rows);
            // Isolated transparent surface, sized to the sprite.
            let mut surface = RgbaImage::new(sprite.rect.w, sprite.rect.h);
            composite::draw_into(
                &mut surface,
                &sub,
                Rect::new(0, 0, sprite.rect.w, sprite.rect.h),
                composite::load_basis(FlipMode::None),
            );
            codec::save_png(&target, &surface)
        } else {
            let target =
                self.dump_root.join(STANDALONE_DIR).join(format!("{}.png", sprite.texture_name));
            if target.exists() {
                return Ok(());
            }
            codec::save_png(&target, &sprite.image)
        }
    }
}

fn sprite_dump_path(base: &Path, collection: &str, short_material: &str, sprite: &str) -> PathBuf {
    base.join(collection).join(short_material).join(format!("{sprite}.png"))
}

/// Extracts a sprite rect from a sheet and encodes it upright. The rect is
/// converted to top-down rows exactly once here; rotated sprites go through
/// the inverse basis so the file on disk is always in natural orientation.
fn dump_sprite_from_sheet(
    sheet: &RgbaImage,
    rect: Rect,
    flip: FlipMode,
    target: &Path,
) -> Result<()> {
    let rows = composite::flip_rect_y(rect, sheet.height());
    let sub = composite::extract_rect(sheet, rows);
    match flip {
        FlipMode::None => codec::save_png(target, &sub),
        _ => codec::save_png(target, &composite::rotate_for_dump(&sub, flip)),
    }
}
