use image::RgbaImage;
use std::sync::Arc;

/// Pixel rectangle in sprite-sheet convention: `y` counts up from the bottom
/// edge of the sheet, matching the rects the packer bakes into sprite
/// definitions. Pixel buffers store rows top-down; `composite::flip_rect_y`
/// converts between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// How the packer stored a sprite inside its sheet. The two rotated variants
/// correspond to the two 90-degree packing conventions found in shipped
/// sheets; their basis vectors are fixed by the packer and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlipMode {
    #[default]
    None,
    Rot90,
    Rot90Cw,
}

/// One sprite definition inside a collection, as enumerated by the engine.
#[derive(Debug, Clone)]
pub struct SpriteDef {
    pub name: Arc<str>,
    pub material: Arc<str>,
    pub rect: Rect,
    pub flip: FlipMode,
}

/// An engine material together with its currently bound sheet image.
/// Material names may carry a variant suffix after a space ("Hero 001");
/// on-disk override folders use the short name ("Hero").
#[derive(Debug, Clone)]
pub struct MaterialDef {
    pub name: Arc<str>,
    pub image: Arc<RgbaImage>,
}

impl MaterialDef {
    pub fn short_name(&self) -> &str {
        short_material_name(&self.name)
    }
}

/// Snapshot of one sprite collection as the engine holds it. The cache
/// mutates `materials[i].image` in place when it republishes a composited
/// sheet.
#[derive(Debug, Clone)]
pub struct SpriteCollection {
    pub name: String,
    pub materials: Vec<MaterialDef>,
    pub sprites: Vec<SpriteDef>,
}

/// A sprite bound directly to a display object, outside the shared-atlas
/// model. `rect` addresses the sprite within `image`; for 1:1 textures it
/// spans the whole image.
#[derive(Debug, Clone)]
pub struct StandaloneSprite {
    pub name: Arc<str>,
    pub texture_name: Arc<str>,
    pub rect: Rect,
    pub pixels_per_unit: f32,
    pub image: Arc<RgbaImage>,
}

/// Capability a display-object adapter exposes so the standalone cache can
/// read and rebind its sprite without knowing the concrete engine type.
pub trait SpriteSlot {
    /// Stable identity of the underlying display object.
    fn id(&self) -> u64;
    fn sprite(&self) -> &StandaloneSprite;
    fn set_sprite(&mut self, sprite: Arc<StandaloneSprite>);
}

pub fn short_material_name(name: &str) -> &str {
    name.split(' ').next().unwrap_or(name)
}
