//! The hot-reloaded custom transform.
//!
//! The transform lives in a single script file. Every tile request calls
//! [`TransformRegistry::reload`] first, so an edit (through
//! `POST /update-script` or directly on disk) applies to the very next tile.
//! The file's SHA-256 gates recompilation: unchanged text reuses the
//! previous outcome, whether that was a compiled transform, no entry point,
//! or an error.
//!
//! | File state                       | Outcome                               |
//! |----------------------------------|---------------------------------------|
//! | absent                           | no transform, not an error            |
//! | compiles, defines `process_tile` | transform installed                   |
//! | compiles, no `process_tile`      | no transform                          |
//! | compile or top-level failure     | no transform, error recorded, request fails |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use rhai::{CallFnOptions, Dynamic, Engine, Scope, AST};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ScriptError;

use super::primitives::{build_engine, Tile};

/// Name of the entry point a script must define. It takes the tile and
/// returns the transformed tile; any other arity fails when called.
pub const ENTRY_POINT: &str = "process_tile";

// =============================================================================
// CompiledTransform
// =============================================================================

/// A compiled script that defines `process_tile`.
pub struct CompiledTransform {
    engine: Arc<Engine>,
    ast: AST,

    /// Scope left behind by the script's top-level statements
    scope: Scope<'static>,
}

impl CompiledTransform {
    /// Run `process_tile` on a tile.
    ///
    /// Runs synchronously and may take up to the engine's operation limit;
    /// call it from a blocking context.
    pub fn apply(&self, tile: RgbImage) -> Result<RgbImage, ScriptError> {
        let mut scope = self.scope.clone();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);

        let result: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut scope, &self.ast, ENTRY_POINT, (Tile(tile),))
            .map_err(|e| ScriptError::Transform(e.to_string()))?;

        let type_name = result.type_name();
        match result.try_cast::<Tile>() {
            Some(Tile(img)) => Ok(img),
            None => Err(ScriptError::Transform(format!(
                "{} must return a Tile, got {}",
                ENTRY_POINT, type_name
            ))),
        }
    }
}

impl std::fmt::Debug for CompiledTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTransform").finish_non_exhaustive()
    }
}

// =============================================================================
// TransformRegistry
// =============================================================================

#[derive(Default)]
struct TransformState {
    /// Hash of the text the current outcome was built from
    hash: Option<String>,
    transform: Option<Arc<CompiledTransform>>,
    last_load_error: Option<ScriptError>,
}

/// Owner of the single optional custom transform.
pub struct TransformRegistry {
    script_path: PathBuf,
    engine: Arc<Engine>,
    state: RwLock<TransformState>,
}

impl TransformRegistry {
    pub fn new(script_path: impl Into<PathBuf>, max_operations: u64) -> Self {
        Self {
            script_path: script_path.into(),
            engine: Arc::new(build_engine(max_operations)),
            state: RwLock::new(TransformState::default()),
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Re-read the script and return the transform to apply, if any.
    ///
    /// # Errors
    ///
    /// Returns the compile or load error when the script is present but
    /// unusable. The previous transform is dropped in that case.
    pub async fn reload(&self) -> Result<Option<Arc<CompiledTransform>>, ScriptError> {
        let text = match tokio::fs::read_to_string(&self.script_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut state = self.state.write().await;
                if state.hash.is_some() || state.last_load_error.is_some() {
                    debug!(path = %self.script_path.display(), "Transform script removed");
                }
                *state = TransformState::default();
                return Ok(None);
            }
            Err(e) => {
                let err = ScriptError::Io(format!("{}: {}", self.script_path.display(), e));
                self.record_failure(err.clone()).await;
                return Err(err);
            }
        };

        let hash = hex::encode(Sha256::digest(text.as_bytes()));
        {
            let state = self.state.read().await;
            if state.hash.as_deref() == Some(hash.as_str()) {
                return match state.last_load_error {
                    Some(ref err) => Err(err.clone()),
                    None => Ok(state.transform.clone()),
                };
            }
        }

        let engine = Arc::clone(&self.engine);
        let outcome = tokio::task::spawn_blocking(move || compile(engine, &text))
            .await
            .unwrap_or_else(|e| Err(ScriptError::Bind(format!("load worker failed: {}", e))));

        match outcome {
            Ok(Some(_)) => info!(path = %self.script_path.display(), "Transform script loaded"),
            Ok(None) => info!(
                path = %self.script_path.display(),
                "Transform script has no {} function; tiles pass through", ENTRY_POINT
            ),
            Err(ref e) => warn!(
                path = %self.script_path.display(),
                error = %e,
                "Transform script failed to load"
            ),
        }

        self.record(Some(hash), outcome).await
    }

    async fn record(
        &self,
        hash: Option<String>,
        outcome: Result<Option<CompiledTransform>, ScriptError>,
    ) -> Result<Option<Arc<CompiledTransform>>, ScriptError> {
        let mut state = self.state.write().await;
        state.hash = hash;
        match outcome {
            Ok(transform) => {
                let transform = transform.map(Arc::new);
                state.transform = transform.clone();
                state.last_load_error = None;
                Ok(transform)
            }
            Err(err) => {
                state.transform = None;
                state.last_load_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Forget the current transform after a failure that has no script hash.
    async fn record_failure(&self, err: ScriptError) {
        let mut state = self.state.write().await;
        state.hash = None;
        state.transform = None;
        state.last_load_error = Some(err);
    }

    /// Persist new script text. The next reload picks it up.
    ///
    /// Written to a uniquely named sibling temp file and renamed into place,
    /// so a concurrent reload never reads a half-written script and
    /// concurrent updates never share a temp file.
    pub async fn update_script(&self, text: &str) -> Result<(), ScriptError> {
        let io_err =
            |e: std::io::Error| ScriptError::Io(format!("{}: {}", self.script_path.display(), e));

        if let Some(parent) = self.script_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let tmp_path = crate::io::temp_sibling(&self.script_path);
        tokio::fs::write(&tmp_path, text).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &self.script_path).await.map_err(io_err)?;

        info!(path = %self.script_path.display(), bytes = text.len(), "Transform script updated");
        Ok(())
    }

    /// Error recorded by the most recent load, if it failed.
    pub async fn last_load_error(&self) -> Option<ScriptError> {
        self.state.read().await.last_load_error.clone()
    }
}

/// Compile the text and run its top-level statements.
fn compile(engine: Arc<Engine>, text: &str) -> Result<Option<CompiledTransform>, ScriptError> {
    let ast = engine
        .compile(text)
        .map_err(|e| ScriptError::Compile(e.to_string()))?;

    let mut scope = Scope::new();
    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|e| ScriptError::Bind(e.to_string()))?;

    let has_entry = ast.iter_functions().any(|f| f.name == ENTRY_POINT);
    if !has_entry {
        return Ok(None);
    }

    Ok(Some(CompiledTransform { engine, ast, scope }))
}
