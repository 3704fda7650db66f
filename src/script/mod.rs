//! Runtime-replaceable custom tile transform.
//!
//! Operators drop a [Rhai](https://rhai.rs) script defining
//! `fn process_tile(tile)` at the configured path. It runs after the fixed
//! post-process stage on every tile, inside a sandboxed engine that only
//! knows the tile primitives in [`primitives`].
//!
//! ```text
//! fn process_tile(t) {
//!     let t = t.autocontrast(2.0);
//!     if t.width > 256 { t.blur(0.8) } else { t }
//! }
//! ```

pub mod primitives;
mod registry;

pub use primitives::{build_engine, Tile};
pub use registry::{CompiledTransform, TransformRegistry, ENTRY_POINT};
