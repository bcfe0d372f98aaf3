pub mod atlas_cache;
pub mod codec;
pub mod composite;
pub mod config;
pub mod dump;
pub mod engine;
pub mod paths;
pub mod standalone;
pub mod watch;

pub use atlas_cache::{AtlasCache, AtlasEntry};
pub use config::PatchConfig;
pub use dump::Dumper;
pub use engine::{FlipMode, MaterialDef, Rect, SpriteCollection, SpriteDef, SpriteSlot, StandaloneSprite};
pub use paths::OverrideTree;
pub use standalone::StandaloneCache;
pub use watch::{OverrideChange, OverrideWatcher};
