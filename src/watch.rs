use crate::atlas_cache::AtlasCache;
use crate::paths::{OverrideTree, STANDALONE_DIR};
use crate::standalone::StandaloneCache;
use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;

/// A filesystem mutation mapped to its cache-invalidation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideChange {
    /// A file under a `T2D` directory: standalone cache, keyed by bare name.
    Standalone { sprite: String },
    /// `<collection>/<atlas>/<sprite>.png` under the sprite root.
    Sprite { collection: String, atlas: String, sprite: String },
    /// `<collection>/<atlas>.png` under the sheet root.
    Sheet { collection: String, atlas: String },
}

/// Watches the sprite and sheet override roots and turns raw notify events
/// into cache invalidations.
///
/// The notify callback thread only forwards events over the channel; all
/// cache mutation happens in `drain`, which the host calls once per tick on
/// the same thread that composites. Rapid repeated events on one key are
/// harmless: each just re-runs an idempotent invalidation.
pub struct OverrideWatcher {
    // Held so the backend keeps delivering events for the lifetime of self.
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    sprite_root: PathBuf,
    sheet_root: PathBuf,
    reload_on_change: bool,
    reload_pending: Arc<AtomicBool>,
}

impl OverrideWatcher {
    pub fn new(
        sprite_root: impl AsRef<Path>,
        sheet_root: impl AsRef<Path>,
        reload_on_change: bool,
    ) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        if let Err(err) = watcher.configure(
            NotifyConfig::default()
                .with_compare_contents(false)
                .with_poll_interval(Duration::from_millis(250)),
        ) {
            eprintln!("[watch] watcher configuration warning: {err}");
        }
        let sprite_root = watch_root(&mut watcher, sprite_root.as_ref())?;
        let sheet_root = watch_root(&mut watcher, sheet_root.as_ref())?;
        Ok(Self {
            _watcher: watcher,
            rx,
            sprite_root,
            sheet_root,
            reload_pending: Arc::new(AtomicBool::new(false)),
            reload_on_change,
        })
    }

    /// Handle the host can poll from anywhere; `take_reload_pending` is the
    /// once-per-tick consumer.
    pub fn reload_pending(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reload_pending)
    }

    pub fn take_reload_pending(&self) -> bool {
        self.reload_pending.swap(false, Ordering::AcqRel)
    }

    /// Applies every change observed since the last drain. Returns the
    /// changes it applied, in arrival order with duplicates collapsed.
    pub fn drain(
        &mut self,
        paths: &mut OverrideTree,
        atlas: &mut AtlasCache,
        standalone: &mut StandaloneCache,
    ) -> Vec<OverrideChange> {
        let mut changes: Vec<OverrideChange> = Vec::new();
        let mut index_dirty = false;
        while let Ok(res) = self.rx.try_recv() {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    eprintln!("[watch] watcher error: {err}");
                    continue;
                }
            };
            if !is_relevant(&event.kind) {
                continue;
            }
            if is_structural(&event.kind) {
                index_dirty = true;
            }
            for path in &event.paths {
                if !path.extension().map(|e| e.eq_ignore_ascii_case("png")).unwrap_or(false) {
                    continue;
                }
                let normalized = normalize_event_path(path);
                let change = if let Ok(rel) = normalized.strip_prefix(&self.sprite_root) {
                    classify_sprite_path(rel)
                } else if let Ok(rel) = normalized.strip_prefix(&self.sheet_root) {
                    classify_sheet_path(rel)
                } else {
                    None
                };
                let Some(change) = change else { continue };
                if !changes.contains(&change) {
                    changes.push(change);
                }
            }
        }
        if index_dirty {
            paths.invalidate_index();
        }
        for change in &changes {
            match change {
                OverrideChange::Standalone { sprite } => standalone.invalidate(sprite),
                OverrideChange::Sprite { collection, atlas: atlas_name, sprite } => {
                    atlas.mark_reload_sprite(collection, atlas_name, sprite);
                }
                OverrideChange::Sheet { collection, atlas: atlas_name } => {
                    atlas.mark_reload_atlas(collection, atlas_name);
                }
            }
            eprintln!("[watch] invalidated {change:?}");
        }
        if self.reload_on_change && !changes.is_empty() {
            self.reload_pending.store(true, Ordering::Release);
        }
        changes
    }
}

fn watch_root(watcher: &mut RecommendedWatcher, root: &Path) -> Result<PathBuf> {
    if !root.exists() {
        anyhow::bail!("watch root '{}' does not exist", root.display());
    }
    let normalized = normalize_event_path(root);
    watcher
        .watch(&normalized, RecursiveMode::Recursive)
        .with_context(|| format!("watch {}", normalized.display()))?;
    Ok(normalized)
}

/// Decomposes a path relative to the sprite root. `T2D` files (either
/// directly inside `T2D` or one family directory deeper) invalidate the
/// standalone cache by bare name; anything at least three segments deep is
/// a `(collection, atlas, sprite)` key.
pub fn classify_sprite_path(rel: &Path) -> Option<OverrideChange> {
    let parts: Vec<String> =
        rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    if parts.is_empty() {
        return None;
    }
    let sprite = file_stem(parts.last()?)?;
    let len = parts.len();
    if (len >= 2 && parts[len - 2] == STANDALONE_DIR)
        || (len >= 3 && parts[len - 3] == STANDALONE_DIR)
    {
        return Some(OverrideChange::Standalone { sprite });
    }
    if len < 3 {
        return None;
    }
    Some(OverrideChange::Sprite {
        collection: parts[len - 3].clone(),
        atlas: parts[len - 2].clone(),
        sprite,
    })
}

/// Decomposes a path relative to the sheet root into `(collection, atlas)`.
pub fn classify_sheet_path(rel: &Path) -> Option<OverrideChange> {
    let parts: Vec<String> =
        rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    if parts.len() < 2 {
        return None;
    }
    let atlas = file_stem(parts.last()?)?;
    Some(OverrideChange::Sheet { collection: parts[parts.len() - 2].clone(), atlas })
}

fn file_stem(name: &str) -> Option<String> {
    Path::new(name).file_stem().map(|s| s.to_string_lossy().into_owned())
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
            | EventKind::Remove(_)
    )
}

/// Create/remove/rename can change which keys exist on disk, so the path
/// index must be rebuilt; plain data writes keep the same key set.
fn is_structural(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

fn normalize_event_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    } else if let Ok(cwd) = env::current_dir() {
        let absolute = cwd.join(path);
        fs::canonicalize(&absolute).unwrap_or(absolute)
    } else {
        PathBuf::from(path)
    }
}
