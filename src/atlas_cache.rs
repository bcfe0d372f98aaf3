use crate::codec;
use crate::composite;
use crate::engine::{short_material_name, SpriteCollection};
use crate::paths::OverrideTree;
use image::RgbaImage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One composited sheet held for a (collection, material) pair.
///
/// `populated` only ever names sprites whose pixels have actually been drawn
/// into `buffer` since the buffer was last created. `attempted` additionally
/// remembers sprites whose override was missing or undecodable, so a bad
/// file is not retried every load; both sets are cleared together on
/// invalidation.
pub struct AtlasEntry {
    buffer: Arc<RgbaImage>,
    populated: HashSet<Arc<str>>,
    attempted: HashSet<Arc<str>>,
    from_override: bool,
}

impl AtlasEntry {
    pub fn buffer(&self) -> &Arc<RgbaImage> {
        &self.buffer
    }

    pub fn from_override(&self) -> bool {
        self.from_override
    }
}

/// Multi-level override cache: collection -> material -> composited sheet.
///
/// All composition runs on the tick thread; the file watcher never touches
/// this directly, it queues invalidation messages that the tick-side drain
/// applies through `mark_reload_*`.
#[derive(Default)]
pub struct AtlasCache {
    atlases: HashMap<String, HashMap<Arc<str>, AtlasEntry>>,
    composites: usize,
}

impl AtlasCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composites every resolvable override for `collection` and republishes
    /// the resulting sheets into its materials. Safe to call repeatedly: a
    /// sheet is acquired at most once per entry lifetime and a sprite is
    /// drawn at most once per buffer generation. Returns true if any sheet
    /// came from an override file rather than the engine's own image.
    pub fn load_collection(
        &mut self,
        paths: &mut OverrideTree,
        collection: &mut SpriteCollection,
    ) -> bool {
        let mut used_override_sheet = false;
        let entries = self.atlases.entry(collection.name.clone()).or_default();
        for mat_index in 0..collection.materials.len() {
            let mat_name = Arc::clone(&collection.materials[mat_index].name);
            if mat_name.is_empty() {
                continue;
            }
            let short = short_material_name(&mat_name).to_string();

            let entry = entries.entry(Arc::clone(&mat_name)).or_insert_with(|| {
                let (buffer, from_override) =
                    acquire_sheet(paths, &collection.name, &short, &collection.materials[mat_index].image);
                AtlasEntry {
                    buffer: Arc::new(buffer),
                    populated: HashSet::new(),
                    attempted: HashSet::new(),
                    from_override,
                }
            });
            if entry.from_override {
                used_override_sheet = true;
            }

            let sheet_h = entry.buffer.height();
            for def in collection.sprites.iter().filter(|d| d.material == mat_name) {
                if def.name.is_empty() || def.rect.is_empty() {
                    continue;
                }
                if entry.populated.contains(&def.name) || !entry.attempted.insert(Arc::clone(&def.name)) {
                    continue;
                }
                let Some(path) = paths.resolve(&collection.name, &short, &def.name) else {
                    continue;
                };
                let src = match codec::load_png(&path) {
                    Ok(img) => img,
                    Err(err) => {
                        eprintln!(
                            "[sprites] override '{}' for {}/{}/{} is unreadable, keeping original: {err:#}",
                            path.display(),
                            collection.name,
                            short,
                            def.name
                        );
                        continue;
                    }
                };
                let dst_rect = composite::flip_rect_y(def.rect, sheet_h);
                let buffer = Arc::make_mut(&mut entry.buffer);
                composite::draw_into(buffer, &src, dst_rect, composite::load_basis(def.flip));
                entry.populated.insert(Arc::clone(&def.name));
                self.composites += 1;
            }

            collection.materials[mat_index].image = Arc::clone(&entry.buffer);
        }
        used_override_sheet
    }

    /// Re-runs `load_collection` over every resident collection. Idempotent:
    /// only entries invalidated since the last pass are recomposed.
    pub fn reload(&mut self, paths: &mut OverrideTree, collections: &mut [SpriteCollection]) {
        eprintln!("[sprites] reloading {} collections", collections.len());
        for collection in collections.iter_mut() {
            self.load_collection(paths, collection);
        }
    }

    /// Clears the populated marker for `sprite` in every material of
    /// `collection` whose name starts with `atlas_prefix`. Prefix matching
    /// covers material variants sharing a name root ("Hero 001", "Hero 002");
    /// it can over-invalidate when unrelated atlases share a prefix, which is
    /// preserved behaviour. Idempotent.
    pub fn mark_reload_sprite(&mut self, collection: &str, atlas_prefix: &str, sprite: &str) {
        let Some(entries) = self.atlases.get_mut(collection) else { return };
        for (mat_name, entry) in entries.iter_mut() {
            if mat_name.starts_with(atlas_prefix) {
                entry.populated.remove(sprite);
                entry.attempted.remove(sprite);
            }
        }
    }

    /// Drops the composited buffers for every material of `collection` whose
    /// name starts with `atlas_prefix`, forcing full sheet re-acquisition and
    /// recomposition on the next load. Idempotent.
    pub fn mark_reload_atlas(&mut self, collection: &str, atlas_prefix: &str) {
        let Some(entries) = self.atlases.get_mut(collection) else { return };
        entries.retain(|mat_name, _| !mat_name.starts_with(atlas_prefix));
    }

    /// Releases everything held for a collection. Buffers drop with the
    /// entries; anything republished into the engine stays alive through its
    /// own Arc until the engine rebinds.
    pub fn cleanup_collection(&mut self, collection: &str) {
        self.atlases.remove(collection);
    }

    pub fn cleanup_all(&mut self) {
        self.atlases.clear();
    }

    pub fn entry(&self, collection: &str, material: &str) -> Option<&AtlasEntry> {
        self.atlases.get(collection)?.get(material)
    }

    pub fn is_populated(&self, collection: &str, material: &str, sprite: &str) -> bool {
        self.entry(collection, material).map(|e| e.populated.contains(sprite)).unwrap_or(false)
    }

    /// Total number of sprite draws performed since construction. Only moves
    /// when pixels are actually composited, which makes it a cheap probe for
    /// the at-most-once guarantee.
    pub fn composite_count(&self) -> usize {
        self.composites
    }
}

/// Sheet precedence: override sheet PNG, else pack sheet PNG, else a
/// snapshot of the image the engine currently has bound.
fn acquire_sheet(
    paths: &OverrideTree,
    collection: &str,
    short_material: &str,
    engine_image: &Arc<RgbaImage>,
) -> (RgbaImage, bool) {
    if let Some(path) = paths.find_sheet(collection, short_material) {
        match codec::load_png(&path) {
            Ok(img) => return (img, true),
            Err(err) => {
                eprintln!(
                    "[sprites] sheet override '{}' for {collection}/{short_material} is unreadable, keeping original: {err:#}",
                    path.display()
                );
            }
        }
    }
    ((**engine_image).clone(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FlipMode, MaterialDef, Rect, SpriteDef};
    use image::{Rgba, RgbaImage};
    use std::fs;
    use std::path::Path;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(rgba))
    }

    fn write_png(path: &Path, img: &RgbaImage) {
        crate::codec::save_png(path, img).expect("write png");
    }

    fn hero_collection(sheet: RgbaImage) -> SpriteCollection {
        SpriteCollection {
            name: "HeroCollection".to_string(),
            materials: vec![MaterialDef { name: "Hero 001".into(), image: Arc::new(sheet) }],
            sprites: vec![SpriteDef {
                name: "Idle_0".into(),
                material: "Hero 001".into(),
                rect: Rect::new(0, 0, 32, 32),
                flip: FlipMode::None,
            }],
        }
    }

    fn tree(base: &Path) -> OverrideTree {
        OverrideTree::new(base.join("Sprites"), base.join("Spritesheets"), Vec::new())
    }

    #[test]
    fn load_composites_override_at_flipped_rect() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_png(
            &dir.path().join("Sprites/HeroCollection/Hero/Idle_0.png"),
            &solid(32, 32, [255, 0, 0, 255]),
        );
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let mut collection = hero_collection(solid(32, 32, [0, 0, 255, 255]));

        cache.load_collection(&mut paths, &mut collection);

        let sheet = &collection.materials[0].image;
        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(sheet.get_pixel(x, y), &Rgba([255, 0, 0, 255]));
            }
        }
        assert!(cache.is_populated("HeroCollection", "Hero 001", "Idle_0"));
    }

    #[test]
    fn rect_y_is_flipped_against_sheet_height() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_png(
            &dir.path().join("Sprites/C/Mat/Spr.png"),
            &solid(8, 8, [0, 255, 0, 255]),
        );
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let mut collection = SpriteCollection {
            name: "C".to_string(),
            materials: vec![MaterialDef { name: "Mat".into(), image: Arc::new(solid(8, 32, [0, 0, 0, 255])) }],
            sprites: vec![SpriteDef {
                name: "Spr".into(),
                material: "Mat".into(),
                rect: Rect::new(0, 0, 8, 8),
                flip: FlipMode::None,
            }],
        };
        cache.load_collection(&mut paths, &mut collection);
        let sheet = &collection.materials[0].image;
        // rect y=0 counts from the bottom, so the override lands in rows 24..32.
        assert_eq!(sheet.get_pixel(0, 24), &Rgba([0, 255, 0, 255]));
        assert_eq!(sheet.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn second_load_draws_nothing_and_buffers_match() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_png(
            &dir.path().join("Sprites/HeroCollection/Hero/Idle_0.png"),
            &solid(32, 32, [255, 0, 0, 255]),
        );
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let mut collection = hero_collection(solid(32, 32, [0, 0, 255, 255]));

        cache.load_collection(&mut paths, &mut collection);
        let first = Arc::clone(&collection.materials[0].image);
        let draws = cache.composite_count();

        cache.load_collection(&mut paths, &mut collection);
        assert_eq!(cache.composite_count(), draws, "no sprite drawn twice");
        assert_eq!(*first, *collection.materials[0].image, "byte-identical sheets");
    }

    #[test]
    fn missing_override_is_not_populated_and_not_retried() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let original = solid(32, 32, [9, 9, 9, 255]);
        let mut collection = hero_collection(original.clone());

        cache.load_collection(&mut paths, &mut collection);
        assert!(!cache.is_populated("HeroCollection", "Hero 001", "Idle_0"));
        assert_eq!(*collection.materials[0].image, original, "original pixels untouched");
        assert_eq!(cache.composite_count(), 0);

        // A file appearing later is only seen after explicit invalidation,
        // so repeated loads cannot storm the resolver.
        write_png(
            &dir.path().join("Sprites/HeroCollection/Hero/Idle_0.png"),
            &solid(32, 32, [1, 2, 3, 255]),
        );
        cache.load_collection(&mut paths, &mut collection);
        assert_eq!(cache.composite_count(), 0, "attempted set blocks a retry");

        paths.invalidate_index();
        cache.mark_reload_sprite("HeroCollection", "Hero", "Idle_0");
        cache.load_collection(&mut paths, &mut collection);
        assert_eq!(cache.composite_count(), 1);
        assert!(cache.is_populated("HeroCollection", "Hero 001", "Idle_0"));
    }

    #[test]
    fn corrupt_override_keeps_original() {
        let dir = tempfile::tempdir().expect("temp dir");
        let bad = dir.path().join("Sprites/HeroCollection/Hero/Idle_0.png");
        fs::create_dir_all(bad.parent().expect("parent")).expect("mkdir");
        fs::write(&bad, b"definitely not a png").expect("write");
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let original = solid(32, 32, [7, 7, 7, 255]);
        let mut collection = hero_collection(original.clone());

        cache.load_collection(&mut paths, &mut collection);
        assert_eq!(*collection.materials[0].image, original);
        assert!(!cache.is_populated("HeroCollection", "Hero 001", "Idle_0"));
    }

    #[test]
    fn invalidate_then_reload_picks_up_modified_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let override_path = dir.path().join("Sprites/HeroCollection/Hero/Idle_0.png");
        write_png(&override_path, &solid(32, 32, [255, 0, 0, 255]));
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let mut collection = hero_collection(solid(32, 32, [0, 0, 255, 255]));

        cache.load_collection(&mut paths, &mut collection);
        write_png(&override_path, &solid(32, 32, [0, 255, 255, 255]));
        cache.mark_reload_sprite("HeroCollection", "Hero", "Idle_0");
        cache.load_collection(&mut paths, &mut collection);

        assert_eq!(collection.materials[0].image.get_pixel(5, 5), &Rgba([0, 255, 255, 255]));
        assert!(cache.is_populated("HeroCollection", "Hero 001", "Idle_0"));
    }

    #[test]
    fn mark_reload_sprite_matches_material_prefix() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_png(&dir.path().join("Sprites/C/Hero/S.png"), &solid(4, 4, [1, 1, 1, 255]));
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let mut collection = SpriteCollection {
            name: "C".to_string(),
            materials: vec![
                MaterialDef { name: "Hero 001".into(), image: Arc::new(solid(4, 4, [0; 4])) },
                MaterialDef { name: "Hero 002".into(), image: Arc::new(solid(4, 4, [0; 4])) },
            ],
            sprites: vec![
                SpriteDef {
                    name: "S".into(),
                    material: "Hero 001".into(),
                    rect: Rect::new(0, 0, 4, 4),
                    flip: FlipMode::None,
                },
                SpriteDef {
                    name: "S".into(),
                    material: "Hero 002".into(),
                    rect: Rect::new(0, 0, 4, 4),
                    flip: FlipMode::None,
                },
            ],
        };
        cache.load_collection(&mut paths, &mut collection);
        assert!(cache.is_populated("C", "Hero 001", "S"));
        assert!(cache.is_populated("C", "Hero 002", "S"));

        cache.mark_reload_sprite("C", "Hero", "S");
        assert!(!cache.is_populated("C", "Hero 001", "S"));
        assert!(!cache.is_populated("C", "Hero 002", "S"));
        // Unknown collection is a no-op.
        cache.mark_reload_sprite("Nope", "Hero", "S");
    }

    #[test]
    fn mark_reload_atlas_drops_matching_entries() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let mut collection = hero_collection(solid(32, 32, [3, 3, 3, 255]));
        cache.load_collection(&mut paths, &mut collection);
        assert!(cache.entry("HeroCollection", "Hero 001").is_some());

        cache.mark_reload_atlas("HeroCollection", "Hero");
        assert!(cache.entry("HeroCollection", "Hero 001").is_none());

        // Next load recreates the entry from scratch.
        cache.load_collection(&mut paths, &mut collection);
        assert!(cache.entry("HeroCollection", "Hero 001").is_some());
    }

    #[test]
    fn cleanup_drops_tracking() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let mut collection = hero_collection(solid(32, 32, [3, 3, 3, 255]));
        cache.load_collection(&mut paths, &mut collection);

        cache.cleanup_collection("HeroCollection");
        assert!(cache.entry("HeroCollection", "Hero 001").is_none());

        cache.load_collection(&mut paths, &mut collection);
        cache.cleanup_all();
        assert!(cache.entry("HeroCollection", "Hero 001").is_none());
    }

    #[test]
    fn sheet_override_reports_custom_and_composites_on_top() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_png(
            &dir.path().join("Spritesheets/HeroCollection/Hero.png"),
            &solid(32, 32, [50, 50, 50, 255]),
        );
        write_png(
            &dir.path().join("Sprites/HeroCollection/Hero/Idle_0.png"),
            &solid(32, 32, [255, 0, 0, 255]),
        );
        let mut paths = tree(dir.path());
        let mut cache = AtlasCache::new();
        let mut collection = hero_collection(solid(32, 32, [0, 0, 255, 255]));

        let used_custom = cache.load_collection(&mut paths, &mut collection);
        assert!(used_custom);
        let entry = cache.entry("HeroCollection", "Hero 001").expect("entry");
        assert!(entry.from_override());
        assert_eq!(collection.materials[0].image.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }
}
