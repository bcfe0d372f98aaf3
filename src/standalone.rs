use crate::codec;
use crate::engine::{Rect, SpriteSlot, StandaloneSprite};
use crate::paths::OverrideTree;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Markers embedded in texture names of packed "family" images: one
/// compressed source image shared by many sprites. Names without a marker
/// are 1:1 (one texture, one sprite image).
const FAMILY_MARKERS: [&str; 2] = ["-BC7-", "DXT5|BC3-"];

pub fn is_family_texture(texture_name: &str) -> bool {
    FAMILY_MARKERS.iter().any(|m| texture_name.contains(m))
}

/// Canonical family name: everything after the format marker, minus the
/// trailing hash segment. "x-BC7-Portraits-Main-ab12" -> "Portraits-Main".
pub fn clean_texture_name(texture_name: &str) -> String {
    for marker in FAMILY_MARKERS {
        if let Some(pos) = texture_name.find(marker) {
            let tail = &texture_name[pos + marker.len()..];
            return match tail.rfind('-') {
                Some(cut) => tail[..cut].to_string(),
                None => tail.to_string(),
            };
        }
    }
    texture_name.to_string()
}

thread_local! {
    static RESOLVING: Cell<bool> = const { Cell::new(false) };
}

struct ResolveGuard;

impl ResolveGuard {
    /// Returns None when this call is a synthetic re-entry: applying a
    /// cached sprite through `set_sprite` can route the host's
    /// instrumentation straight back into `resolve`.
    fn enter() -> Option<Self> {
        if RESOLVING.with(|f| f.get()) {
            return None;
        }
        RESOLVING.with(|f| f.set(true));
        Some(Self)
    }
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        RESOLVING.with(|f| f.set(false));
    }
}

/// Cache for sprites bound directly to display objects, outside the shared
/// atlas model. Family-derived resources are keyed by sprite name with a
/// reverse map from the family texture to its dependents; 1:1 resources are
/// keyed by texture name and shared across every slot bound to it.
#[derive(Default)]
pub struct StandaloneCache {
    sprites: HashMap<String, Arc<StandaloneSprite>>,
    families: HashMap<String, HashSet<String>>,
    initialized: HashSet<u64>,
    decodes: usize,
}

impl StandaloneCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the override resource for the slot's current sprite, decoding
    /// it on first sight. Missing overrides leave the slot untouched.
    pub fn resolve(&mut self, paths: &mut OverrideTree, slot: &mut dyn SpriteSlot) {
        let Some(_guard) = ResolveGuard::enter() else { return };
        self.initialized.insert(slot.id());

        let current = slot.sprite();
        let name = current.name.to_string();
        let texture_name = current.texture_name.to_string();
        if name.is_empty() || texture_name.is_empty() {
            return;
        }

        if let Some(cached) = self.sprites.get(&name) {
            let cached = Arc::clone(cached);
            slot.set_sprite(cached);
            return;
        }

        if is_family_texture(&texture_name) {
            let family = clean_texture_name(&texture_name);
            let Some(path) = paths.find_standalone_in_family(&family, &name) else { return };
            let Some(image) = self.decode(&path) else { return };
            let sprite = Arc::new(StandaloneSprite {
                name: current.name.clone(),
                texture_name: current.texture_name.clone(),
                // Sized to the sprite's own rect, never the family image's.
                rect: Rect::new(0, 0, image.width(), image.height()),
                pixels_per_unit: current.pixels_per_unit,
                image: Arc::new(image),
            });
            self.sprites.insert(name.clone(), Arc::clone(&sprite));
            self.families.entry(texture_name).or_default().insert(name);
            slot.set_sprite(sprite);
        } else {
            if let Some(cached) = self.sprites.get(&texture_name) {
                let cached = Arc::clone(cached);
                slot.set_sprite(cached);
                return;
            }
            let Some(path) = paths.find_standalone(&texture_name) else { return };
            let Some(image) = self.decode(&path) else { return };
            let sprite = Arc::new(StandaloneSprite {
                name: current.name.clone(),
                texture_name: current.texture_name.clone(),
                rect: Rect::new(0, 0, image.width(), image.height()),
                pixels_per_unit: current.pixels_per_unit,
                image: Arc::new(image),
            });
            self.sprites.insert(texture_name, Arc::clone(&sprite));
            slot.set_sprite(sprite);
        }
    }

    /// Drops the resource cached under `name`. When `name` is a family
    /// texture, every sprite ever resolved through it is dropped too.
    /// Idempotent; safe to call for names that were never cached.
    pub fn invalidate(&mut self, name: &str) {
        self.sprites.remove(name);
        if let Some(members) = self.families.remove(name) {
            for member in members {
                self.sprites.remove(&member);
            }
        }
    }

    /// Clears every cached resource and re-resolves the current sprite of
    /// every bound slot.
    pub fn reload_all<'a>(
        &mut self,
        paths: &mut OverrideTree,
        slots: impl IntoIterator<Item = &'a mut dyn SpriteSlot>,
    ) {
        self.sprites.clear();
        self.families.clear();
        for slot in slots {
            self.resolve(paths, slot);
        }
    }

    /// Resolves any slot that never went through `resolve`, e.g. objects
    /// whose sprite was assigned before this cache came up.
    pub fn check_uninitialized<'a>(
        &mut self,
        paths: &mut OverrideTree,
        slots: impl IntoIterator<Item = &'a mut dyn SpriteSlot>,
    ) {
        for slot in slots {
            if !self.initialized.contains(&slot.id()) {
                self.resolve(paths, slot);
            }
        }
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.sprites.contains_key(name)
    }

    /// Number of override decodes performed since construction.
    pub fn decode_count(&self) -> usize {
        self.decodes
    }

    fn decode(&mut self, path: &std::path::Path) -> Option<image::RgbaImage> {
        match codec::load_png(path) {
            Ok(img) => {
                self.decodes += 1;
                Some(img)
            }
            Err(err) => {
                eprintln!(
                    "[sprites] standalone override '{}' is unreadable, keeping original: {err:#}",
                    path.display()
                );
                None
            }
        }
    }
}
