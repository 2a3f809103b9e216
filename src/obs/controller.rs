//! The single-visible-item state machine over the target scene.
//!
//! `set_expression` resolves a label to a scene item through the mirror, hides
//! every other expression item, then shows the target. Overlapping calls are
//! last-writer-wins: each call claims a monotonically increasing sequence
//! token, and a superseded call stops between steps instead of overwriting
//! state a newer call owns. The remote-mutation phase of each call runs under
//! an async lock so two sequences never interleave their wire traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::ControllerError;
use super::mirror::{SceneItem, SceneMirror};
use super::SceneRemote;
use crate::expression::Expression;

pub struct ExpressionSceneController {
    remote: Arc<dyn SceneRemote>,
    scene: String,
    min_confidence: f64,
    mirror: parking_lot::Mutex<SceneMirror>,
    /// Which expression we believe is visible. Set only after a successful
    /// show; cleared on reset and on scene-structure changes.
    current: parking_lot::Mutex<Option<Expression>>,
    /// Sequence token; each initialize/set_expression claims the next value,
    /// and a claim supersedes every lower one.
    seq: AtomicU64,
    /// Serializes the remote-mutation phase of a sequence. A superseded
    /// sequence aborts at its next token check, so a waiter never sits behind
    /// more than the in-flight request.
    op_lock: AsyncMutex<()>,
    ready_tx: watch::Sender<bool>,
    /// How long a command arriving before initialize completes may wait.
    grace: Duration,
}

impl ExpressionSceneController {
    pub fn new(
        remote: Arc<dyn SceneRemote>,
        scene: impl Into<String>,
        min_confidence: f64,
        grace: Duration,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            remote,
            scene: scene.into(),
            min_confidence,
            mirror: parking_lot::Mutex::new(SceneMirror::default()),
            current: parking_lot::Mutex::new(None),
            seq: AtomicU64::new(0),
            op_lock: AsyncMutex::new(()),
            ready_tx,
            grace,
        }
    }

    /// The expression we believe is visible, if any.
    pub fn current_expression(&self) -> Option<Expression> {
        *self.current.lock()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Fetch the scene's item list, build a fresh mirror, and hide every
    /// expression item that is currently visible. Commands are accepted once
    /// this completes; per-item hide failures are logged, not fatal.
    pub async fn initialize(&self) -> Result<(), ControllerError> {
        let my_seq = self.claim();
        let _ = self.ready_tx.send_replace(false);
        *self.current.lock() = None;

        let _op = self.op_lock.lock().await;
        let infos = self.remote.list_scene_items(&self.scene).await?;
        if !self.is_current(my_seq) {
            debug!("Initialize superseded during item-list fetch");
            return Ok(());
        }

        let mut mirror = SceneMirror::from_items(infos);
        let expression_items = mirror.expression_items();
        let expression_count = expression_items.len();
        let to_hide: Vec<SceneItem> = expression_items
            .into_iter()
            .filter(|item| item.visible)
            .collect();
        *self.mirror.lock() = mirror;

        let failed = self.hide_items(&to_hide, my_seq).await;
        if !self.is_current(my_seq) {
            return Ok(());
        }
        if failed > 0 {
            warn!("{} item(s) could not be hidden during initialize", failed);
        }

        let _ = self.ready_tx.send_replace(true);
        info!(
            "🎭 Controller ready: scene '{}' with {} expression item(s)",
            self.scene, expression_count
        );
        Ok(())
    }

    /// Classifier entry point. Low-confidence detections are dropped;
    /// unrecognized labels are recoverable errors.
    pub async fn on_expression_detected(
        &self,
        label: &str,
        confidence: f64,
    ) -> Result<(), ControllerError> {
        if confidence < self.min_confidence {
            debug!(
                "Ignoring '{}' at confidence {:.2} (below {:.2})",
                label, confidence, self.min_confidence
            );
            return Ok(());
        }
        let Some(expr) = Expression::parse(label) else {
            debug!("Unrecognized expression label '{}'", label);
            return Err(ControllerError::UnknownExpression(label.to_string()));
        };
        self.set_expression(expr).await
    }

    /// Make `expr`'s scene item the only visible expression item.
    ///
    /// Hides are issued concurrently and individually; a failed hide is
    /// logged and does not stop the show. If a newer call claims the token
    /// while this one is in flight, this one stops at its next check and the
    /// newer call finishes from the mirror's current cached state.
    pub async fn set_expression(&self, expr: Expression) -> Result<(), ControllerError> {
        self.wait_ready().await?;

        if self.current_expression() == Some(expr) {
            debug!("Expression '{}' is already current", expr);
            return Ok(());
        }

        let my_seq = self.claim();
        let _op = self.op_lock.lock().await;
        if !self.is_current(my_seq) {
            debug!("Expression change to '{}' superseded while queued", expr);
            return Ok(());
        }

        if !self.refresh_if_stale(my_seq).await? {
            return Ok(());
        }

        let (target, to_hide) = {
            let mut mirror = self.mirror.lock();
            let Some(target) = mirror.resolve(expr) else {
                return Err(ControllerError::UnknownExpression(expr.to_string()));
            };
            let to_hide: Vec<SceneItem> = mirror
                .expression_items()
                .into_iter()
                .filter(|item| item.visible && item.id != target.id)
                .collect();
            (target, to_hide)
        };

        let failed = self.hide_items(&to_hide, my_seq).await;
        if !self.is_current(my_seq) {
            debug!("Expression change to '{}' superseded before show", expr);
            return Ok(());
        }

        // Record the target as visible before the show goes out, so if a
        // newer call takes over mid-show its hide set still covers this item.
        self.mirror.lock().set_visible(target.id, true);
        if let Err(e) = self
            .remote
            .set_scene_item_enabled(&self.scene, target.id, true)
            .await
        {
            warn!("Failed to show '{}' (item {}): {}", target.name, target.id, e);
            return Err(ControllerError::Call(e));
        }

        if self.is_current(my_seq) {
            self.mirror.lock().apply_exclusive_visibility(target.id);
            *self.current.lock() = Some(expr);
            info!("🎭 Expression set to '{}'", expr);
        } else {
            // The show landed but a newer call owns the final state; the
            // mirror already records this item visible for it to hide.
            debug!("Expression change to '{}' superseded after show", expr);
        }

        if failed > 0 {
            return Err(ControllerError::PartialHideFailure { failed });
        }
        Ok(())
    }

    /// A scene-structure event arrived. The mirror is re-fetched in full on
    /// the next access; until the next explicit set, what is visible is
    /// unknown.
    pub fn mark_scene_changed(&self) {
        self.mirror.lock().invalidate();
        *self.current.lock() = None;
        info!("🔁 Scene structure changed; item list will be re-fetched");
    }

    /// Drop all cached scene state and stop accepting commands until the next
    /// `initialize`. Cancels in-flight sequences at their next token check.
    pub fn reset(&self) {
        self.claim();
        let _ = self.ready_tx.send_replace(false);
        self.mirror.lock().clear();
        *self.current.lock() = None;
        debug!("Controller reset; mirror discarded");
    }

    fn claim(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, my_seq: u64) -> bool {
        self.seq.load(Ordering::SeqCst) == my_seq
    }

    async fn wait_ready(&self) -> Result<(), ControllerError> {
        let mut ready = self.ready_tx.subscribe();
        if *ready.borrow() {
            return Ok(());
        }
        debug!(
            "Command arrived before initialize completed; waiting up to {:?}",
            self.grace
        );
        let result = match timeout(self.grace, ready.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(ControllerError::NotReady),
        };
        result
    }

    /// Re-fetch the item list if a structure event invalidated it. Returns
    /// false when the sequence was superseded during the fetch.
    async fn refresh_if_stale(&self, my_seq: u64) -> Result<bool, ControllerError> {
        if !self.mirror.lock().is_stale() {
            return Ok(true);
        }
        info!("🔁 Re-fetching scene '{}' after a structure change", self.scene);
        let infos = self.remote.list_scene_items(&self.scene).await?;
        if !self.is_current(my_seq) {
            return Ok(false);
        }
        *self.mirror.lock() = SceneMirror::from_items(infos);
        Ok(true)
    }

    /// Hide the given items concurrently. Successes update the mirror (while
    /// the token is still current); failures are logged per item and counted.
    async fn hide_items(&self, items: &[SceneItem], my_seq: u64) -> usize {
        if items.is_empty() {
            return 0;
        }
        let hides = items.iter().map(|item| async move {
            let result = self
                .remote
                .set_scene_item_enabled(&self.scene, item.id, false)
                .await;
            (item, result)
        });

        let mut failed = 0;
        for (item, result) in join_all(hides).await {
            match result {
                Ok(()) => {
                    if self.is_current(my_seq) {
                        self.mirror.lock().set_visible(item.id, false);
                    }
                },
                Err(e) => {
                    failed += 1;
                    warn!("Failed to hide '{}' (item {}): {}", item.name, item.id, e);
                },
            }
        }
        failed
    }
}
