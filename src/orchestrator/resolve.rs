use crate::store::{DirectoryState, Tab};

/// The tab the terminal should show for a directory.
///
/// With tabs enabled the persisted active tab wins; otherwise, or when the persisted id
/// no longer names a tab, the first tab is used.
pub fn active_tab(state: &DirectoryState, tabs_enabled: bool) -> Option<&Tab> {
    let persisted = if tabs_enabled {
        state
            .active_tab_id
            .as_deref()
            .and_then(|id| state.tab(id))
    } else {
        None
    };
    persisted.or_else(|| state.tabs.first())
}
