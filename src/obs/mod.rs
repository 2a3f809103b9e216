//! OBS integration: websocket session management and the expression-driven
//! scene-item state machine.
//!
//! `ObsConnection` owns the single obs-websocket session (handshake, request
//! correlation, event dispatch). `ExpressionSceneController` sits on top of
//! the [`SceneRemote`] trait so tests can substitute a scripted remote.

mod connection;
mod controller;
mod error;
mod mirror;
mod protocol;

pub use connection::{ConnectionInfo, ConnectionState, EventHandler, ObsConnection, ObsEvent};
pub use controller::ExpressionSceneController;
pub use error::{CallError, ConnectError, ControllerError};
pub use mirror::{SceneItem, SceneMirror};
pub use protocol::SceneItemInfo;

use async_trait::async_trait;

/// The slice of the remote protocol surface the controller consumes.
///
/// Implemented by `ObsConnection` over the live session and by scripted
/// doubles in tests. Methods take `&self`; implementations use interior
/// mutability.
#[async_trait]
pub trait SceneRemote: Send + Sync {
    /// Fetch the full item list for one scene, in scene order.
    async fn list_scene_items(&self, scene: &str) -> Result<Vec<SceneItemInfo>, CallError>;

    /// Show or hide a single scene item.
    async fn set_scene_item_enabled(
        &self,
        scene: &str,
        item_id: i64,
        enabled: bool,
    ) -> Result<(), CallError>;
}
