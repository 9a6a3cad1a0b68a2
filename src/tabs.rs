//! Per-workspace open/active/pinned tab state.
//!
//! The stored open list keeps insertion order (plus explicit moves). The
//! pinned-first ordering shown in the tab strip is a projection computed by
//! `display_order`, never written back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::layout_store::TabLayout;
use crate::target::{ChatId, ChatMode, SubChatId};

/// Tab metadata as delivered by the data layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubChatMeta {
    pub id: SubChatId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: ChatMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleDirection {
    Prev,
    Next,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseRefusal {
    /// Closing would leave the workspace with no open tab.
    LastOpenTab,
    NotOpen(SubChatId),
    IndexOutOfRange(usize),
    NothingToClose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Tabs removed, in the order they were closed.
    Closed(Vec<SubChatId>),
    Refused(CloseRefusal),
}

impl CloseOutcome {
    pub fn closed(&self) -> &[SubChatId] {
        match self {
            CloseOutcome::Closed(ids) => ids,
            CloseOutcome::Refused(_) => &[],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkspaceTabs {
    pub open: Vec<SubChatId>,
    pub active: Option<SubChatId>,
    pub pinned: Vec<SubChatId>,
    /// Multi-selection used by bulk close.
    pub selected: Vec<SubChatId>,
    pub modes: HashMap<SubChatId, ChatMode>,
}

impl WorkspaceTabs {
    pub fn is_pinned(&self, tab: &SubChatId) -> bool {
        self.pinned.contains(tab)
    }

    pub fn is_open(&self, tab: &SubChatId) -> bool {
        self.open.contains(tab)
    }

    /// Pinned tabs first, each group in stored order.
    pub fn display_order(&self) -> Vec<SubChatId> {
        let (mut pinned, unpinned): (Vec<_>, Vec<_>) =
            self.open.iter().cloned().partition(|id| self.pinned.contains(id));
        pinned.extend(unpinned);
        pinned
    }

    fn to_layout(&self) -> TabLayout {
        TabLayout {
            open_sub_chat_ids: self.open.clone(),
            pinned_sub_chat_ids: self.pinned.clone(),
            active_sub_chat_id: self.active.clone(),
        }
    }

    /// Remove `to_close` from the open list, then repair the active pointer:
    /// a closed active tab hands over to its nearest surviving left neighbor,
    /// or the first tab when nothing survives to its left.
    fn remove_tabs(&mut self, to_close: &[SubChatId]) -> Vec<SubChatId> {
        let active_index = self
            .active
            .as_ref()
            .and_then(|a| self.open.iter().position(|id| id == a));
        let active_closed = self.active.as_ref().is_some_and(|a| to_close.contains(a));

        let mut closed = Vec::new();
        let mut fallback = None;
        for (index, id) in self.open.iter().enumerate() {
            if to_close.contains(id) {
                closed.push(id.clone());
            } else if active_index.is_some_and(|ai| index < ai) {
                fallback = Some(id.clone());
            }
        }
        self.open.retain(|id| !to_close.contains(id));
        self.pinned.retain(|id| !to_close.contains(id));
        self.selected.retain(|id| !to_close.contains(id));

        if active_closed {
            self.active = fallback.or_else(|| self.open.first().cloned());
        }
        closed
    }
}

#[derive(Default)]
pub struct TabLifecycleManager {
    workspaces: HashMap<ChatId, WorkspaceTabs>,
}

impl TabLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a workspace's state with a persisted layout. Ids are
    /// de-duplicated, pins and the active pointer are clamped to open tabs.
    pub fn load(&mut self, chat_id: &ChatId, layout: TabLayout) {
        let mut open: Vec<SubChatId> = Vec::with_capacity(layout.open_sub_chat_ids.len());
        for id in layout.open_sub_chat_ids {
            if !open.contains(&id) {
                open.push(id);
            }
        }
        let mut pinned: Vec<SubChatId> = Vec::new();
        for id in layout.pinned_sub_chat_ids {
            if open.contains(&id) && !pinned.contains(&id) {
                pinned.push(id);
            }
        }
        let active = layout
            .active_sub_chat_id
            .filter(|id| open.contains(id))
            .or_else(|| open.first().cloned());

        tracing::debug!(chat = %chat_id, tabs = open.len(), "loaded tab layout");
        let previous_modes = self
            .workspaces
            .remove(chat_id)
            .map(|ws| ws.modes)
            .unwrap_or_default();
        self.workspaces.insert(
            chat_id.clone(),
            WorkspaceTabs {
                open,
                active,
                pinned,
                selected: Vec::new(),
                modes: previous_modes,
            },
        );
    }

    pub fn workspace(&self, chat_id: &ChatId) -> Option<&WorkspaceTabs> {
        self.workspaces.get(chat_id)
    }

    pub fn layout(&self, chat_id: &ChatId) -> TabLayout {
        self.workspaces
            .get(chat_id)
            .map(WorkspaceTabs::to_layout)
            .unwrap_or_default()
    }

    pub fn open_tabs(&self, chat_id: &ChatId) -> Vec<SubChatId> {
        self.workspaces.get(chat_id).map(|ws| ws.open.clone()).unwrap_or_default()
    }

    pub fn active_tab(&self, chat_id: &ChatId) -> Option<SubChatId> {
        self.workspaces.get(chat_id).and_then(|ws| ws.active.clone())
    }

    pub fn display_order(&self, chat_id: &ChatId) -> Vec<SubChatId> {
        self.workspaces
            .get(chat_id)
            .map(WorkspaceTabs::display_order)
            .unwrap_or_default()
    }

    fn entry(&mut self, chat_id: &ChatId) -> &mut WorkspaceTabs {
        self.workspaces.entry(chat_id.clone()).or_default()
    }

    /// Append if absent, then make it active.
    pub fn open(&mut self, chat_id: &ChatId, tab: &SubChatId) {
        let ws = self.entry(chat_id);
        if !ws.open.contains(tab) {
            ws.open.push(tab.clone());
        }
        ws.active = Some(tab.clone());
    }

    pub fn set_active(&mut self, chat_id: &ChatId, tab: &SubChatId) -> bool {
        let ws = self.entry(chat_id);
        if ws.open.contains(tab) {
            ws.active = Some(tab.clone());
            true
        } else {
            false
        }
    }

    /// Close one tab. The only open tab can't be closed this way; the caller
    /// has to archive the workspace instead.
    pub fn close(&mut self, chat_id: &ChatId, tab: &SubChatId) -> CloseOutcome {
        let ws = self.entry(chat_id);
        if !ws.open.contains(tab) {
            return CloseOutcome::Refused(CloseRefusal::NotOpen(tab.clone()));
        }
        if ws.open.len() == 1 {
            return CloseOutcome::Refused(CloseRefusal::LastOpenTab);
        }
        CloseOutcome::Closed(ws.remove_tabs(std::slice::from_ref(tab)))
    }

    /// Close every unpinned tab except `keep`, which becomes active.
    pub fn close_others(&mut self, chat_id: &ChatId, keep: &SubChatId) -> CloseOutcome {
        let ws = self.entry(chat_id);
        if !ws.open.contains(keep) {
            return CloseOutcome::Refused(CloseRefusal::NotOpen(keep.clone()));
        }
        let to_close: Vec<SubChatId> = ws
            .open
            .iter()
            .filter(|id| *id != keep && !ws.pinned.contains(id))
            .cloned()
            .collect();
        if to_close.is_empty() {
            return CloseOutcome::Refused(CloseRefusal::NothingToClose);
        }
        let closed = ws.remove_tabs(&to_close);
        ws.active = Some(keep.clone());
        CloseOutcome::Closed(closed)
    }

    /// Close every unpinned tab displayed right of `visual_index` (an index
    /// into `display_order`). A closed active tab hands over to the tab at
    /// `visual_index`.
    pub fn close_right_of(&mut self, chat_id: &ChatId, visual_index: usize) -> CloseOutcome {
        let ws = self.entry(chat_id);
        let display = ws.display_order();
        let Some(anchor) = display.get(visual_index).cloned() else {
            return CloseOutcome::Refused(CloseRefusal::IndexOutOfRange(visual_index));
        };
        let to_close: Vec<SubChatId> = display[visual_index + 1..]
            .iter()
            .filter(|id| !ws.pinned.contains(id))
            .cloned()
            .collect();
        if to_close.is_empty() {
            return CloseOutcome::Refused(CloseRefusal::NothingToClose);
        }
        let active_closed = ws.active.as_ref().is_some_and(|a| to_close.contains(a));
        let closed = ws.remove_tabs(&to_close);
        if active_closed {
            ws.active = Some(anchor);
        }
        CloseOutcome::Closed(closed)
    }

    /// Close the multi-selected tabs. Refused outright when the selection
    /// covers every open tab.
    pub fn close_selected(&mut self, chat_id: &ChatId) -> CloseOutcome {
        let ws = self.entry(chat_id);
        let to_close: Vec<SubChatId> = ws
            .open
            .iter()
            .filter(|id| ws.selected.contains(id))
            .cloned()
            .collect();
        if to_close.is_empty() {
            return CloseOutcome::Refused(CloseRefusal::NothingToClose);
        }
        if to_close.len() == ws.open.len() {
            return CloseOutcome::Refused(CloseRefusal::LastOpenTab);
        }
        CloseOutcome::Closed(ws.remove_tabs(&to_close))
    }

    /// Move the active pointer circularly through the open list. With no
    /// active tab the first one is selected.
    pub fn cycle(&mut self, chat_id: &ChatId, direction: CycleDirection) -> Option<SubChatId> {
        let ws = self.entry(chat_id);
        if ws.open.is_empty() {
            return None;
        }
        let len = ws.open.len();
        let current = ws
            .active
            .as_ref()
            .and_then(|a| ws.open.iter().position(|id| id == a));
        let next_index = match current {
            None => 0,
            Some(i) => match direction {
                CycleDirection::Next => (i + 1) % len,
                CycleDirection::Prev => (i + len - 1) % len,
            },
        };
        let next = ws.open[next_index].clone();
        ws.active = Some(next.clone());
        Some(next)
    }

    /// Returns whether the tab is pinned afterwards.
    pub fn toggle_pin(&mut self, chat_id: &ChatId, tab: &SubChatId) -> bool {
        let ws = self.entry(chat_id);
        if let Some(pos) = ws.pinned.iter().position(|id| id == tab) {
            ws.pinned.remove(pos);
            false
        } else if ws.open.contains(tab) {
            ws.pinned.push(tab.clone());
            true
        } else {
            false
        }
    }

    /// Bulk pin/unpin. Ids that aren't open are ignored when pinning.
    pub fn set_pinned(&mut self, chat_id: &ChatId, tabs: &[SubChatId], pinned: bool) -> usize {
        let ws = self.entry(chat_id);
        let mut changed = 0;
        for tab in tabs {
            let is_pinned = ws.pinned.contains(tab);
            if pinned && !is_pinned && ws.open.contains(tab) {
                ws.pinned.push(tab.clone());
                changed += 1;
            } else if !pinned && is_pinned {
                ws.pinned.retain(|id| id != tab);
                changed += 1;
            }
        }
        changed
    }

    /// Explicit reorder of the stored list (drag and drop).
    pub fn move_tab(&mut self, chat_id: &ChatId, tab: &SubChatId, to_index: usize) -> bool {
        let ws = self.entry(chat_id);
        let Some(from) = ws.open.iter().position(|id| id == tab) else {
            return false;
        };
        let id = ws.open.remove(from);
        let to = to_index.min(ws.open.len());
        ws.open.insert(to, id);
        true
    }

    pub fn set_selected(&mut self, chat_id: &ChatId, tab: &SubChatId, selected: bool) {
        let ws = self.entry(chat_id);
        let present = ws.selected.contains(tab);
        if selected && !present && ws.open.contains(tab) {
            ws.selected.push(tab.clone());
        } else if !selected && present {
            ws.selected.retain(|id| id != tab);
        }
    }

    pub fn selected(&self, chat_id: &ChatId) -> Vec<SubChatId> {
        self.workspaces.get(chat_id).map(|ws| ws.selected.clone()).unwrap_or_default()
    }

    pub fn clear_selection(&mut self, chat_id: &ChatId) {
        if let Some(ws) = self.workspaces.get_mut(chat_id) {
            ws.selected.clear();
        }
    }

    pub fn set_mode(&mut self, chat_id: &ChatId, tab: &SubChatId, mode: ChatMode) {
        self.entry(chat_id).modes.insert(tab.clone(), mode);
    }

    pub fn mode(&self, chat_id: &ChatId, tab: &SubChatId) -> Option<ChatMode> {
        self.workspaces.get(chat_id).and_then(|ws| ws.modes.get(tab).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<SubChatId> {
        values.iter().map(|v| SubChatId::new(*v)).collect()
    }

    fn manager_with(chat: &str, open: &[&str], active: &str, pinned: &[&str]) -> (TabLifecycleManager, ChatId) {
        let chat_id = ChatId::new(chat);
        let mut manager = TabLifecycleManager::new();
        manager.load(
            &chat_id,
            TabLayout {
                open_sub_chat_ids: ids(open),
                pinned_sub_chat_ids: ids(pinned),
                active_sub_chat_id: Some(SubChatId::new(active)),
            },
        );
        (manager, chat_id)
    }

    #[test]
    fn close_active_moves_left_then_cycle_next() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C"], "B", &["A"]);

        let outcome = m.close(&w1, &SubChatId::new("B"));
        assert_eq!(outcome, CloseOutcome::Closed(ids(&["B"])));
        assert_eq!(m.open_tabs(&w1), ids(&["A", "C"]));
        assert_eq!(m.active_tab(&w1), Some(SubChatId::new("A")));

        assert_eq!(m.cycle(&w1, CycleDirection::Next), Some(SubChatId::new("C")));
    }

    #[test]
    fn closing_pinned_tab_drops_its_pin() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C"], "A", &["B", "C"]);
        m.close(&w1, &SubChatId::new("B"));
        assert_eq!(m.layout(&w1).pinned_sub_chat_ids, ids(&["C"]));

        // Reopened through undo, the tab comes back unpinned.
        m.open(&w1, &SubChatId::new("B"));
        assert_eq!(m.display_order(&w1), ids(&["C", "A", "B"]));
    }

    #[test]
    fn closing_only_tab_is_refused() {
        let (mut m, w1) = manager_with("W1", &["A"], "A", &[]);
        assert_eq!(
            m.close(&w1, &SubChatId::new("A")),
            CloseOutcome::Refused(CloseRefusal::LastOpenTab)
        );
        assert_eq!(m.open_tabs(&w1), ids(&["A"]));
        assert_eq!(m.active_tab(&w1), Some(SubChatId::new("A")));
    }

    #[test]
    fn closing_one_of_two_leaves_survivor_active() {
        for closing in ["A", "B"] {
            for active in ["A", "B"] {
                let (mut m, w1) = manager_with("W1", &["A", "B"], active, &[]);
                m.close(&w1, &SubChatId::new(closing));
                let survivor = if closing == "A" { "B" } else { "A" };
                assert_eq!(m.open_tabs(&w1), ids(&[survivor]));
                assert_eq!(m.active_tab(&w1), Some(SubChatId::new(survivor)));
            }
        }
    }

    #[test]
    fn closing_first_active_tab_falls_back_to_new_first() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C"], "A", &[]);
        m.close(&w1, &SubChatId::new("A"));
        assert_eq!(m.active_tab(&w1), Some(SubChatId::new("B")));
    }

    #[test]
    fn closing_unknown_tab_is_refused() {
        let (mut m, w1) = manager_with("W1", &["A", "B"], "A", &[]);
        assert_eq!(
            m.close(&w1, &SubChatId::new("Z")),
            CloseOutcome::Refused(CloseRefusal::NotOpen(SubChatId::new("Z")))
        );
    }

    #[test]
    fn full_forward_cycle_returns_to_start() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C", "D"], "C", &[]);
        for _ in 0..4 {
            m.cycle(&w1, CycleDirection::Next);
        }
        assert_eq!(m.active_tab(&w1), Some(SubChatId::new("C")));
    }

    #[test]
    fn prev_after_m_nexts_lands_on_m_minus_one() {
        let open = ["A", "B", "C", "D", "E"];
        for m_steps in 0..12usize {
            let (mut m, w1) = manager_with("W1", &open, "A", &[]);
            for _ in 0..m_steps {
                m.cycle(&w1, CycleDirection::Next);
            }
            m.cycle(&w1, CycleDirection::Prev);
            let expected = (m_steps + open.len() - 1) % open.len();
            assert_eq!(m.active_tab(&w1), Some(SubChatId::new(open[expected])));
        }
    }

    #[test]
    fn cycle_without_active_selects_first() {
        let w1 = ChatId::new("W1");
        let mut m = TabLifecycleManager::new();
        m.load(
            &w1,
            TabLayout {
                open_sub_chat_ids: ids(&["A", "B"]),
                ..TabLayout::default()
            },
        );
        // load picks the first tab when nothing is stored, so clear it first.
        m.entry(&w1).active = None;
        assert_eq!(m.cycle(&w1, CycleDirection::Prev), Some(SubChatId::new("A")));
    }

    #[test]
    fn cycle_on_empty_workspace_is_none() {
        let mut m = TabLifecycleManager::new();
        assert_eq!(m.cycle(&ChatId::new("W1"), CycleDirection::Next), None);
    }

    #[test]
    fn open_appends_once_and_activates() {
        let (mut m, w1) = manager_with("W1", &["A"], "A", &[]);
        m.open(&w1, &SubChatId::new("B"));
        m.open(&w1, &SubChatId::new("A"));
        assert_eq!(m.open_tabs(&w1), ids(&["A", "B"]));
        assert_eq!(m.active_tab(&w1), Some(SubChatId::new("A")));
    }

    #[test]
    fn close_others_keeps_pinned_and_target() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C", "D"], "D", &["A"]);
        let outcome = m.close_others(&w1, &SubChatId::new("C"));
        assert_eq!(outcome.closed(), ids(&["B", "D"]).as_slice());
        assert_eq!(m.open_tabs(&w1), ids(&["A", "C"]));
        assert_eq!(m.active_tab(&w1), Some(SubChatId::new("C")));
    }

    #[test]
    fn close_right_of_uses_display_order() {
        // Stored order A B C D with C pinned displays as C A B D.
        let (mut m, w1) = manager_with("W1", &["A", "B", "C", "D"], "D", &["C"]);
        assert_eq!(m.display_order(&w1), ids(&["C", "A", "B", "D"]));

        let outcome = m.close_right_of(&w1, 1);
        assert_eq!(outcome.closed(), ids(&["B", "D"]).as_slice());
        assert_eq!(m.open_tabs(&w1), ids(&["A", "C"]));
        assert_eq!(m.active_tab(&w1), Some(SubChatId::new("A")));
    }

    #[test]
    fn close_right_of_last_index_has_nothing_to_close() {
        let (mut m, w1) = manager_with("W1", &["A", "B"], "A", &[]);
        assert_eq!(
            m.close_right_of(&w1, 1),
            CloseOutcome::Refused(CloseRefusal::NothingToClose)
        );
        assert_eq!(
            m.close_right_of(&w1, 7),
            CloseOutcome::Refused(CloseRefusal::IndexOutOfRange(7))
        );
    }

    #[test]
    fn close_selected_refuses_to_empty_workspace() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C"], "B", &[]);
        for tab in ["A", "B", "C"] {
            m.set_selected(&w1, &SubChatId::new(tab), true);
        }
        assert_eq!(m.close_selected(&w1), CloseOutcome::Refused(CloseRefusal::LastOpenTab));

        m.set_selected(&w1, &SubChatId::new("A"), false);
        assert_eq!(m.close_selected(&w1).closed(), ids(&["B", "C"]).as_slice());
        assert_eq!(m.open_tabs(&w1), ids(&["A"]));
        assert_eq!(m.active_tab(&w1), Some(SubChatId::new("A")));
        assert!(m.selected(&w1).is_empty());
    }

    #[test]
    fn pin_is_a_projection_not_a_reorder() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C"], "A", &[]);
        assert!(m.toggle_pin(&w1, &SubChatId::new("C")));
        assert_eq!(m.open_tabs(&w1), ids(&["A", "B", "C"]));
        assert_eq!(m.display_order(&w1), ids(&["C", "A", "B"]));
        assert!(!m.toggle_pin(&w1, &SubChatId::new("C")));
        assert_eq!(m.display_order(&w1), ids(&["A", "B", "C"]));
    }

    #[test]
    fn bulk_pin_and_unpin() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C"], "A", &[]);
        assert_eq!(m.set_pinned(&w1, &ids(&["A", "C", "Z"]), true), 2);
        assert_eq!(m.set_pinned(&w1, &ids(&["A", "C"]), true), 0);
        assert_eq!(m.set_pinned(&w1, &ids(&["C"]), false), 1);
        assert_eq!(m.layout(&w1).pinned_sub_chat_ids, ids(&["A"]));
    }

    #[test]
    fn move_tab_reorders_stored_list() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C"], "A", &[]);
        assert!(m.move_tab(&w1, &SubChatId::new("C"), 0));
        assert_eq!(m.open_tabs(&w1), ids(&["C", "A", "B"]));
        assert!(!m.move_tab(&w1, &SubChatId::new("Z"), 0));
    }

    #[test]
    fn load_sanitizes_layout() {
        let w1 = ChatId::new("W1");
        let mut m = TabLifecycleManager::new();
        m.load(
            &w1,
            TabLayout {
                open_sub_chat_ids: ids(&["A", "B", "A"]),
                pinned_sub_chat_ids: ids(&["Z", "B"]),
                active_sub_chat_id: Some(SubChatId::new("Z")),
            },
        );
        let ws = m.workspace(&w1).unwrap();
        assert_eq!(ws.open, ids(&["A", "B"]));
        assert_eq!(ws.pinned, ids(&["B"]));
        assert_eq!(ws.active, Some(SubChatId::new("A")));
    }

    #[test]
    fn active_is_always_open_after_any_close() {
        let (mut m, w1) = manager_with("W1", &["A", "B", "C", "D", "E"], "C", &["B"]);
        m.close_right_of(&w1, 2);
        m.close(&w1, &SubChatId::new("A"));
        m.close_others(&w1, &SubChatId::new("B"));
        let ws = m.workspace(&w1).unwrap();
        assert!(!ws.open.is_empty());
        assert!(ws.active.as_ref().is_some_and(|a| ws.open.contains(a)));
    }
}
