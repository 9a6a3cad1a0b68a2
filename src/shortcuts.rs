//! Platform-aware keyboard shortcuts.
//!
//! A native desktop shell owns the primary modifier combinations. Inside a
//! generic browser the same combos belong to the browser (new window, close
//! tab...), so tab shortcuts move to an alternate Primary+Alt combination.
//!
//! Every binding matches an exact modifier set: Primary+Shift+T must never
//! trigger the Primary+T handler and vice versa.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    #[default]
    Desktop,
    Browser,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    #[serde(rename = "macos")]
    MacOs,
    Other,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") { Os::MacOs } else { Os::Other }
    }
}

impl Default for Os {
    fn default() -> Self {
        Self::current()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    /// Command on macOS, the Windows/Super key elsewhere.
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };

    pub fn meta() -> Self {
        Self { meta: true, ..Self::NONE }
    }

    pub fn ctrl() -> Self {
        Self { ctrl: true, ..Self::NONE }
    }

    pub fn with_shift(self) -> Self {
        Self { shift: true, ..self }
    }

    pub fn with_alt(self) -> Self {
        Self { alt: true, ..self }
    }
}

/// Key identity, normalized so `T` and `t` compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Named(String),
}

impl Key {
    pub fn char(c: char) -> Self {
        Key::Char(c.to_ascii_lowercase())
    }
}

impl From<char> for Key {
    fn from(c: char) -> Self {
        Key::char(c)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
    /// The event originated from an editable text field.
    pub in_text_input: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<Key>, modifiers: Modifiers) -> Self {
        Self {
            key: key.into(),
            modifiers,
            in_text_input: false,
        }
    }

    pub fn from_text_input(mut self) -> Self {
        self.in_text_input = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShortcutAction {
    NewTab,
    /// Closes the bulk selection when one exists, the active tab otherwise.
    CloseTab,
    PrevTab,
    NextTab,
    ToggleSidebar,
    RestoreArchivedWorkspace,
    Undo,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyProfile {
    pub host: Host,
    pub os: Os,
}

impl KeyProfile {
    pub fn new(host: Host, os: Os) -> Self {
        Self { host, os }
    }

    /// Meta on macOS, Ctrl elsewhere.
    pub fn primary(&self) -> Modifiers {
        match self.os {
            Os::MacOs => Modifiers::meta(),
            Os::Other => Modifiers::ctrl(),
        }
    }

    fn tab_modifiers(&self) -> Modifiers {
        match self.host {
            Host::Desktop => self.primary(),
            Host::Browser => self.primary().with_alt(),
        }
    }

    pub fn resolve(&self, event: &KeyEvent) -> Option<ShortcutAction> {
        let Key::Char(c) = event.key else {
            return None;
        };
        let mods = event.modifiers;
        let primary = self.primary();
        let tab = self.tab_modifiers();

        let action = match c {
            't' if mods == tab => ShortcutAction::NewTab,
            't' if mods == tab.with_shift() => ShortcutAction::RestoreArchivedWorkspace,
            'w' if mods == tab => ShortcutAction::CloseTab,
            '[' if mods == tab => ShortcutAction::PrevTab,
            ']' if mods == tab => ShortcutAction::NextTab,
            '\\' if mods == primary => ShortcutAction::ToggleSidebar,
            // Text fields keep their own undo.
            'z' if mods == primary && !event.in_text_input => ShortcutAction::Undo,
            _ => return None,
        };
        Some(action)
    }
}

type Listener = Arc<dyn Fn(ShortcutAction) -> bool + Send + Sync>;

#[derive(Default)]
struct Listeners {
    entries: Mutex<Vec<(u64, Listener)>>,
}

/// Offers resolved shortcuts to every installed listener.
pub struct ShortcutDispatcher {
    profile: KeyProfile,
    listeners: Arc<Listeners>,
    next_id: AtomicU64,
}

impl ShortcutDispatcher {
    pub fn new(profile: KeyProfile) -> Self {
        Self {
            profile,
            listeners: Arc::new(Listeners::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn profile(&self) -> KeyProfile {
        self.profile
    }

    /// Install a listener for as long as the returned guard lives.
    #[must_use = "dropping the guard removes the listener"]
    pub fn install(&self, handler: impl Fn(ShortcutAction) -> bool + Send + Sync + 'static) -> ListenerGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.entries.lock().push((id, Arc::new(handler)));
        ListenerGuard {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries.lock().len()
    }

    /// Resolve the event and hand the action to every listener. Returns
    /// whether any of them handled it.
    pub fn dispatch(&self, event: &KeyEvent) -> bool {
        let Some(action) = self.profile.resolve(event) else {
            return false;
        };
        // Listeners run without the lock so they can install or drop guards.
        let listeners: Vec<Listener> = self
            .listeners
            .entries
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        let mut handled = false;
        for listener in listeners {
            handled |= listener(action);
        }
        tracing::debug!(?action, handled, "shortcut dispatched");
        handled
    }
}

/// Removes its listener on drop.
pub struct ListenerGuard {
    listeners: Weak<Listeners>,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.entries.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const MAC_DESKTOP: KeyProfile = KeyProfile {
        host: Host::Desktop,
        os: Os::MacOs,
    };
    const LINUX_BROWSER: KeyProfile = KeyProfile {
        host: Host::Browser,
        os: Os::Other,
    };

    #[test]
    fn desktop_mac_bindings() {
        let cmd = Modifiers::meta();
        let cases = [
            ('t', cmd, Some(ShortcutAction::NewTab)),
            ('T', cmd.with_shift(), Some(ShortcutAction::RestoreArchivedWorkspace)),
            ('w', cmd, Some(ShortcutAction::CloseTab)),
            ('[', cmd, Some(ShortcutAction::PrevTab)),
            (']', cmd, Some(ShortcutAction::NextTab)),
            ('\\', cmd, Some(ShortcutAction::ToggleSidebar)),
            ('z', cmd, Some(ShortcutAction::Undo)),
            ('t', Modifiers::ctrl(), None),
            ('t', Modifiers::NONE, None),
        ];
        for (key, mods, expected) in cases {
            assert_eq!(MAC_DESKTOP.resolve(&KeyEvent::new(key, mods)), expected, "{key} {mods:?}");
        }
    }

    #[test]
    fn browser_moves_tab_shortcuts_to_alt() {
        let ctrl = Modifiers::ctrl();
        let ctrl_alt = ctrl.with_alt();
        assert_eq!(LINUX_BROWSER.resolve(&KeyEvent::new('t', ctrl)), None);
        assert_eq!(
            LINUX_BROWSER.resolve(&KeyEvent::new('t', ctrl_alt)),
            Some(ShortcutAction::NewTab)
        );
        assert_eq!(
            LINUX_BROWSER.resolve(&KeyEvent::new('w', ctrl_alt)),
            Some(ShortcutAction::CloseTab)
        );
        assert_eq!(
            LINUX_BROWSER.resolve(&KeyEvent::new(']', ctrl_alt)),
            Some(ShortcutAction::NextTab)
        );
        assert_eq!(
            LINUX_BROWSER.resolve(&KeyEvent::new('t', ctrl_alt.with_shift())),
            Some(ShortcutAction::RestoreArchivedWorkspace)
        );
        // Sidebar and undo keep the plain primary modifier.
        assert_eq!(
            LINUX_BROWSER.resolve(&KeyEvent::new('\\', ctrl)),
            Some(ShortcutAction::ToggleSidebar)
        );
        assert_eq!(LINUX_BROWSER.resolve(&KeyEvent::new('z', ctrl)), Some(ShortcutAction::Undo));
    }

    #[test]
    fn extra_modifiers_do_not_collide() {
        let cmd = Modifiers::meta();
        assert_eq!(MAC_DESKTOP.resolve(&KeyEvent::new('w', cmd.with_shift())), None);
        assert_eq!(MAC_DESKTOP.resolve(&KeyEvent::new('z', cmd.with_shift())), None);
        assert_eq!(MAC_DESKTOP.resolve(&KeyEvent::new('t', cmd.with_alt())), None);
        let both = Modifiers { ctrl: true, ..cmd };
        assert_eq!(MAC_DESKTOP.resolve(&KeyEvent::new('t', both)), None);
    }

    #[test]
    fn undo_ignored_in_text_input() {
        let event = KeyEvent::new('z', Modifiers::meta()).from_text_input();
        assert_eq!(MAC_DESKTOP.resolve(&event), None);
        // Other shortcuts still fire from a text field.
        let event = KeyEvent::new('t', Modifiers::meta()).from_text_input();
        assert_eq!(MAC_DESKTOP.resolve(&event), Some(ShortcutAction::NewTab));
    }

    #[test]
    fn named_keys_never_match() {
        let event = KeyEvent::new(Key::Named("Escape".into()), Modifiers::meta());
        assert_eq!(MAC_DESKTOP.resolve(&event), None);
    }

    #[test]
    fn dropping_guard_removes_listener() {
        let dispatcher = ShortcutDispatcher::new(MAC_DESKTOP);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let guard = dispatcher.install(move |action| {
            if action == ShortcutAction::NewTab {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            } else {
                false
            }
        });

        let new_tab = KeyEvent::new('t', Modifiers::meta());
        assert!(dispatcher.dispatch(&new_tab));
        assert!(!dispatcher.dispatch(&KeyEvent::new('w', Modifiers::meta())));

        drop(guard);
        assert_eq!(dispatcher.listener_count(), 0);
        assert!(!dispatcher.dispatch(&new_tab));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_listener_sees_the_action() {
        let dispatcher = ShortcutDispatcher::new(MAC_DESKTOP);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&seen);
        let b = Arc::clone(&seen);
        let _g1 = dispatcher.install(move |action| {
            a.lock().push(("one", action));
            false
        });
        let _g2 = dispatcher.install(move |action| {
            b.lock().push(("two", action));
            true
        });

        assert!(dispatcher.dispatch(&KeyEvent::new('[', Modifiers::meta())));
        assert_eq!(
            *seen.lock(),
            vec![("one", ShortcutAction::PrevTab), ("two", ShortcutAction::PrevTab)]
        );
    }

    #[test]
    fn guard_outliving_dispatcher_is_harmless() {
        let dispatcher = ShortcutDispatcher::new(MAC_DESKTOP);
        let guard = dispatcher.install(|_| true);
        drop(dispatcher);
        drop(guard);
    }
}
