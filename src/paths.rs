use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name holding standalone (single-image-per-sprite) overrides
/// and dumps. Part of the on-disk layout; changing it breaks existing
/// override folders.
pub const STANDALONE_DIR: &str = "T2D";

/// Subdirectory names repeated under the primary base and every pack base.
pub const SPRITES_DIR: &str = "Sprites";
pub const SHEETS_DIR: &str = "Spritesheets";

/// Resolves logical asset keys to override files on disk.
///
/// Per-sprite overrides live at `<root>/<collection>/<material>/<sprite>.png`
/// and are served from a built index keyed by the last three path segments.
/// Packs are scanned after the primary root, so a pack entry silently wins
/// on key collision. Sheet and standalone lookups are filtered directory
/// scans; they share no state with the index.
pub struct OverrideTree {
    sprite_root: PathBuf,
    sheet_root: PathBuf,
    pack_roots: Vec<PathBuf>,
    index: HashMap<String, PathBuf>,
    built: bool,
}

impl OverrideTree {
    pub fn new(
        sprite_root: impl Into<PathBuf>,
        sheet_root: impl Into<PathBuf>,
        pack_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            sprite_root: sprite_root.into(),
            sheet_root: sheet_root.into(),
            pack_roots,
            index: HashMap::new(),
            built: false,
        }
    }

    pub fn sprite_root(&self) -> &Path {
        &self.sprite_root
    }

    pub fn sheet_root(&self) -> &Path {
        &self.sheet_root
    }

    /// Walks the primary sprite root, then each pack root in registration
    /// order. Later scans overwrite, which is the entire precedence rule.
    pub fn build_index(&mut self) {
        self.index.clear();
        index_png_tree(&self.sprite_root, &mut self.index);
        for pack in &self.pack_roots {
            index_png_tree(&pack.join(SPRITES_DIR), &mut self.index);
        }
        self.built = true;
        eprintln!("[sprites] override index built: {} entries", self.index.len());
    }

    /// Drops the built index. The next `resolve` rebuilds; until someone
    /// calls this, files added or removed on disk are not picked up.
    pub fn invalidate_index(&mut self) {
        self.built = false;
    }

    pub fn index_built(&self) -> bool {
        self.built
    }

    /// O(1) lookup of a per-sprite override. Not-found is a normal outcome,
    /// never an error; callers fall back to original content.
    pub fn resolve(&mut self, collection: &str, material: &str, sprite: &str) -> Option<PathBuf> {
        if !self.built {
            self.build_index();
        }
        self.index.get(&format!("{collection}/{material}/{sprite}")).cloned()
    }

    /// Full-sheet override for a material, searched under the sheet root
    /// (then each pack's sheet root) for `<short_material>.png` directly
    /// inside a directory named after the collection.
    pub fn find_sheet(&self, collection: &str, short_material: &str) -> Option<PathBuf> {
        let file_name = format!("{short_material}.png");
        if let Some(found) = scan_for_file(&self.sheet_root, &file_name, |parent| {
            dir_name_is(parent, collection)
        }) {
            return Some(found);
        }
        for pack in &self.pack_roots {
            let root = pack.join(SHEETS_DIR);
            if let Some(found) =
                scan_for_file(&root, &file_name, |parent| dir_name_is(parent, collection))
            {
                return Some(found);
            }
        }
        None
    }

    /// Standalone 1:1 override: `<sprite>.png` directly inside a `T2D`
    /// directory.
    pub fn find_standalone(&self, sprite: &str) -> Option<PathBuf> {
        let file_name = format!("{sprite}.png");
        let in_t2d = |parent: &Path| dir_name_is(parent, STANDALONE_DIR);
        if let Some(found) = scan_for_file(&self.sprite_root, &file_name, in_t2d) {
            return Some(found);
        }
        for pack in &self.pack_roots {
            if let Some(found) = scan_for_file(&pack.join(SPRITES_DIR), &file_name, in_t2d) {
                return Some(found);
            }
        }
        None
    }

    /// Standalone family override: `<sprite>.png` inside `T2D/<family>/`.
    pub fn find_standalone_in_family(&self, family: &str, sprite: &str) -> Option<PathBuf> {
        let file_name = format!("{sprite}.png");
        let in_family = |parent: &Path| {
            dir_name_is(parent, family)
                && parent.parent().map(|p| dir_name_is(p, STANDALONE_DIR)).unwrap_or(false)
        };
        if let Some(found) = scan_for_file(&self.sprite_root, &file_name, in_family) {
            return Some(found);
        }
        for pack in &self.pack_roots {
            if let Some(found) = scan_for_file(&pack.join(SPRITES_DIR), &file_name, in_family) {
                return Some(found);
            }
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn index_len(&self) -> usize {
        self.index.len()
    }
}

fn dir_name_is(dir: &Path, expected: &str) -> bool {
    dir.file_name().map(|n| n == expected).unwrap_or(false)
}

/// Recursively collects `*.png` files under `root`, keying each by its last
/// three path segments (`collection/material/sprite`, extension stripped).
/// Files nested fewer than three levels deep are ignored.
fn index_png_tree(root: &Path, index: &mut HashMap<String, PathBuf>) {
    visit_png_files(root, &mut |path| {
        let Ok(rel) = path.strip_prefix(root) else { return };
        let parts: Vec<String> =
            rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
        if parts.len() < 3 {
            return;
        }
        let stem = Path::new(&parts[parts.len() - 1])
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = format!("{}/{}/{}", parts[parts.len() - 3], parts[parts.len() - 2], stem);
        index.insert(key, path.to_path_buf());
    });
}

fn scan_for_file(root: &Path, file_name: &str, parent_ok: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    let mut found = None;
    visit_png_files(root, &mut |path| {
        if found.is_some() {
            return;
        }
        let name_matches = path.file_name().map(|n| n == file_name).unwrap_or(false);
        if name_matches {
            if let Some(parent) = path.parent() {
                if parent_ok(parent) {
                    found = Some(path.to_path_buf());
                }
            }
        }
    });
    found
}

fn visit_png_files(root: &Path, f: &mut dyn FnMut(&Path)) {
    let Ok(entries) = fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            visit_png_files(&path, f);
        } else if path.extension().map(|e| e.eq_ignore_ascii_case("png")).unwrap_or(false) {
            f(&path);
        }
    }
}
