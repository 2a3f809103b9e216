//! Local mirror of the target scene's item list.
//!
//! The mirror is the controller's possibly-stale cache of remote state: the
//! ordered item sequence plus a derived Expression -> item mapping. The
//! mapping is a pure projection of the sequence, built lazily and rebuilt
//! whenever the sequence changes; it is never patched independently, so it
//! cannot drift from the items it was derived from.

use std::collections::HashMap;

use tracing::warn;

use super::protocol::SceneItemInfo;
use crate::expression::Expression;

/// One layer in the target scene, as last observed.
///
/// `visible` is the locally cached state and may lag reality; only the
/// controller (or a full rebuild from a fresh item list) mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneItem {
    pub id: i64,
    pub name: String,
    pub visible: bool,
}

/// Ordered sequence of all items in the target scene, expression-relevant or
/// not, plus the lazily derived expression mapping.
#[derive(Debug, Default)]
pub struct SceneMirror {
    items: Vec<SceneItem>,
    /// Expression -> index into `items`. None means "rebuild on next access".
    mapping: Option<HashMap<Expression, usize>>,
    /// Set when a remote scene-structure event arrived; the item list itself
    /// must be re-fetched before the next resolution.
    stale: bool,
}

impl SceneMirror {
    /// Build a mirror from a freshly fetched item list.
    pub fn from_items(mut infos: Vec<SceneItemInfo>) -> Self {
        infos.sort_by_key(|info| info.scene_item_index);
        let items = infos
            .into_iter()
            .map(|info| SceneItem {
                id: info.scene_item_id,
                name: info.source_name,
                visible: info.scene_item_enabled,
            })
            .collect();
        Self {
            items,
            mapping: None,
            stale: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when a remote structure change invalidated the item list.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Mark the item list as outdated. The mapping is dropped with it; both
    /// are rebuilt in full on the next fetch, never patched in place.
    pub fn invalidate(&mut self) {
        self.mapping = None;
        self.stale = true;
    }

    /// Discard everything (disconnect / reinitialize).
    pub fn clear(&mut self) {
        self.items.clear();
        self.mapping = None;
        self.stale = false;
    }

    /// Resolve an expression to its scene item, building the mapping if
    /// needed. Returns a snapshot of the item.
    pub fn resolve(&mut self, expr: Expression) -> Option<SceneItem> {
        let mapping = self.mapping();
        let index = *mapping.get(&expr)?;
        Some(self.items[index].clone())
    }

    /// All expression-mapped items, in scene order.
    pub fn expression_items(&mut self) -> Vec<SceneItem> {
        let mut indices: Vec<usize> = self.mapping().values().copied().collect();
        indices.sort_unstable();
        indices.into_iter().map(|i| self.items[i].clone()).collect()
    }

    /// Update the cached visibility of one item.
    pub fn set_visible(&mut self, item_id: i64, visible: bool) {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == item_id) {
            item.visible = visible;
        }
    }

    /// Mark the target visible and every other expression-mapped item hidden.
    /// Non-expression items are left untouched.
    pub fn apply_exclusive_visibility(&mut self, target_id: i64) {
        let indices: Vec<usize> = self.mapping().values().copied().collect();
        for index in indices {
            let item = &mut self.items[index];
            item.visible = item.id == target_id;
        }
    }

    /// Look up an item by id.
    pub fn item(&self, item_id: i64) -> Option<&SceneItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    fn mapping(&mut self) -> &HashMap<Expression, usize> {
        if self.mapping.is_none() {
            self.mapping = Some(Self::build_mapping(&self.items));
        }
        self.mapping.as_ref().expect("mapping was just built")
    }

    /// Derive the expression mapping from the item sequence. When two items
    /// canonicalize to the same expression the first in scene order wins; the
    /// duplicate is a configuration mistake and is surfaced as a warning.
    fn build_mapping(items: &[SceneItem]) -> HashMap<Expression, usize> {
        let mut mapping = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            let Some(expr) = Expression::parse(&item.name) else {
                continue;
            };
            if let Some(&existing) = mapping.get(&expr) {
                let first: &SceneItem = &items[existing];
                warn!(
                    "Scene items '{}' and '{}' both map to expression '{}'; keeping '{}' (first in scene order)",
                    first.name, item.name, expr, first.name
                );
                continue;
            }
            mapping.insert(expr, index);
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: i64, index: u32, name: &str, enabled: bool) -> SceneItemInfo {
        SceneItemInfo {
            scene_item_id: id,
            scene_item_index: index,
            source_name: name.to_string(),
            scene_item_enabled: enabled,
        }
    }

    fn face_scene() -> SceneMirror {
        SceneMirror::from_items(vec![
            info(1, 0, "Neutral", false),
            info(2, 1, "Happy", false),
            info(3, 2, "Sad", true),
            info(4, 3, "Decoration", true),
        ])
    }

    #[test]
    fn items_are_ordered_by_scene_index() {
        let mut mirror = SceneMirror::from_items(vec![
            info(9, 2, "Sad", false),
            info(7, 0, "Happy", false),
            info(8, 1, "Neutral", false),
        ]);
        let ids: Vec<i64> = mirror.expression_items().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[test]
    fn resolve_matches_names_case_insensitively() {
        let mut mirror = SceneMirror::from_items(vec![info(5, 0, "HAPPY", false)]);
        let item = mirror.resolve(Expression::Happy).unwrap();
        assert_eq!(item.id, 5);
    }

    #[test]
    fn resolve_ignores_non_expression_items() {
        let mut mirror = face_scene();
        assert!(mirror.resolve(Expression::Angry).is_none());
        let names: Vec<String> = mirror
            .expression_items()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["Neutral", "Happy", "Sad"]);
    }

    #[test]
    fn ambiguous_names_keep_the_first_in_scene_order() {
        let mut mirror = SceneMirror::from_items(vec![
            info(1, 0, "Happy", false),
            info(2, 1, "happy", false),
        ]);
        assert_eq!(mirror.resolve(Expression::Happy).unwrap().id, 1);
        assert_eq!(mirror.expression_items().len(), 1);
    }

    #[test]
    fn exclusive_visibility_spares_non_expression_items() {
        let mut mirror = face_scene();
        mirror.apply_exclusive_visibility(2);
        assert!(mirror.item(2).unwrap().visible);
        assert!(!mirror.item(1).unwrap().visible);
        assert!(!mirror.item(3).unwrap().visible);
        // Decoration is not expression-mapped and keeps its state.
        assert!(mirror.item(4).unwrap().visible);
    }

    #[test]
    fn invalidate_marks_stale_until_rebuilt() {
        let mut mirror = face_scene();
        assert!(!mirror.is_stale());
        mirror.invalidate();
        assert!(mirror.is_stale());

        let rebuilt = SceneMirror::from_items(vec![info(10, 0, "Angry", false)]);
        assert!(!rebuilt.is_stale());
    }

    #[test]
    fn clear_empties_the_mirror() {
        let mut mirror = face_scene();
        mirror.clear();
        assert!(mirror.is_empty());
        assert!(mirror.resolve(Expression::Sad).is_none());
    }
}
