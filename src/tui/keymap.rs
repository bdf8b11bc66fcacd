use crossterm::event::{KeyCode, KeyModifiers};

// ── Actions ──────────────────────────────────────────────────────────

/// Keys the front-end intercepts instead of forwarding to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NewTab,
    CloseTab,
    NextTab,
    PrevTab,
    Restart,
    HardRestart,
    ArmCtrl,
    ArmCmd,
    ToggleHelp,
    Detach,
}

// ── Help categories ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelpCategory {
    Tabs,
    Session,
    Modifiers,
}

impl HelpCategory {
    fn label(self) -> &'static str {
        match self {
            Self::Tabs => "Tabs",
            Self::Session => "Session",
            Self::Modifiers => "Modifiers",
        }
    }

    /// Fixed display order for the help overlay.
    const ORDERED: &[Self] = &[Self::Tabs, Self::Session, Self::Modifiers];
}

// ── Keybinding ───────────────────────────────────────────────────────

/// A single key → action mapping with metadata for the help overlay.
#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
    pub action: Action,
    /// Human-readable key label shown in help (e.g. `"Alt+T"`).
    pub label: &'static str,
    pub description: &'static str,
    pub category: HelpCategory,
}

/// A single row in the help overlay.
#[derive(Debug, Clone)]
pub struct HelpEntry {
    pub label: &'static str,
    pub description: &'static str,
}

// ── KeyMap ────────────────────────────────────────────────────────────

pub struct KeyMap {
    pub bindings: Vec<KeyBinding>,
}

impl KeyMap {
    pub fn default_keymap() -> Self {
        Self {
            bindings: default_bindings(),
        }
    }

    /// Shift is ignored for characters, the case of the char already carries it.
    pub fn lookup(&self, code: KeyCode, modifiers: KeyModifiers) -> Option<Action> {
        let modifiers = if matches!(code, KeyCode::Char(_)) {
            modifiers.difference(KeyModifiers::SHIFT)
        } else {
            modifiers
        };
        self.bindings
            .iter()
            .find(|kb| kb.code == code && kb.modifiers == modifiers)
            .map(|kb| kb.action)
    }

    /// Grouped help entries in display order. Bindings with an empty description are
    /// aliases documented by their sibling.
    pub fn help_entries(&self) -> Vec<(&'static str, Vec<HelpEntry>)> {
        HelpCategory::ORDERED
            .iter()
            .filter_map(|&cat| {
                let entries: Vec<HelpEntry> = self
                    .bindings
                    .iter()
                    .filter(|kb| kb.category == cat && !kb.description.is_empty())
                    .map(|kb| HelpEntry {
                        label: kb.label,
                        description: kb.description,
                    })
                    .collect();
                (!entries.is_empty()).then(|| (cat.label(), entries))
            })
            .collect()
    }
}

// ── Default bindings ─────────────────────────────────────────────────

#[allow(clippy::enum_glob_use)]
fn default_bindings() -> Vec<KeyBinding> {
    use Action::*;
    use HelpCategory::*;

    vec![
        KeyBinding {
            code: KeyCode::Char('t'),
            modifiers: KeyModifiers::ALT,
            action: NewTab,
            label: "  Alt+T",
            description: "New tab",
            category: Tabs,
        },
        KeyBinding {
            code: KeyCode::Char('w'),
            modifiers: KeyModifiers::ALT,
            action: CloseTab,
            label: "  Alt+W",
            description: "Close tab (ends its shell)",
            category: Tabs,
        },
        KeyBinding {
            code: KeyCode::Char('n'),
            modifiers: KeyModifiers::ALT,
            action: NextTab,
            label: "  Alt+N/P",
            description: "Next / previous tab",
            category: Tabs,
        },
        KeyBinding {
            code: KeyCode::Char('p'),
            modifiers: KeyModifiers::ALT,
            action: PrevTab,
            label: "",
            description: "",
            category: Tabs,
        },
        KeyBinding {
            code: KeyCode::Char('r'),
            modifiers: KeyModifiers::ALT,
            action: Restart,
            label: "  Alt+r",
            description: "Restart terminal",
            category: Session,
        },
        KeyBinding {
            code: KeyCode::Char('R'),
            modifiers: KeyModifiers::ALT,
            action: HardRestart,
            label: "  Alt+R",
            description: "Hard restart after a fatal error",
            category: Session,
        },
        KeyBinding {
            code: KeyCode::Char('h'),
            modifiers: KeyModifiers::ALT,
            action: ToggleHelp,
            label: "  Alt+H",
            description: "Toggle this help",
            category: Session,
        },
        KeyBinding {
            code: KeyCode::Char('q'),
            modifiers: KeyModifiers::ALT,
            action: Detach,
            label: "  Alt+Q",
            description: "Detach (sessions keep running)",
            category: Session,
        },
        KeyBinding {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::ALT,
            action: ArmCtrl,
            label: "  Alt+C",
            description: "Ctrl for the next key",
            category: Modifiers,
        },
        KeyBinding {
            code: KeyCode::Char('m'),
            modifiers: KeyModifiers::ALT,
            action: ArmCmd,
            label: "  Alt+M",
            description: "Cmd for the next key",
            category: Modifiers,
        },
    ]
}

// ── Tests ────────────────────────────────────────────────────────────
