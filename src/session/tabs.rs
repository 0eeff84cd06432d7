use crate::session::document::DocumentId;

pub const MAX_SHORTCUT_TAB: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TabError {
    #[error("tab index {index} out of range for {len} tab(s)")]
    Range { index: usize, len: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabSession {
    tab_order: Vec<DocumentId>,
    active: Option<DocumentId>,
}

impl TabSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a session from persisted parts, dropping duplicate ids and an
    /// active id that is not part of the order.
    pub fn from_parts(tab_order: Vec<DocumentId>, active: Option<DocumentId>) -> Self {
        let mut deduped: Vec<DocumentId> = Vec::with_capacity(tab_order.len());
        for id in tab_order {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        let active = active
            .filter(|id| deduped.contains(id))
            .or_else(|| deduped.first().cloned());
        Self {
            tab_order: deduped,
            active,
        }
    }

    pub fn tab_order(&self) -> &[DocumentId] {
        &self.tab_order
    }

    pub fn active(&self) -> Option<&DocumentId> {
        self.active.as_ref()
    }

    pub fn active_index(&self) -> Option<usize> {
        let active = self.active.as_ref()?;
        self.position(active)
    }

    pub fn len(&self) -> usize {
        self.tab_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tab_order.is_empty()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.tab_order.contains(id)
    }

    fn position(&self, id: &DocumentId) -> Option<usize> {
        self.tab_order.iter().position(|candidate| candidate == id)
    }

    pub fn select_tab(&mut self, id: &DocumentId) -> bool {
        if !self.contains(id) || self.active.as_ref() == Some(id) {
            return false;
        }
        self.active = Some(id.clone());
        true
    }

    pub fn open_tab(&mut self, id: DocumentId) -> bool {
        if !self.contains(&id) {
            self.tab_order.push(id.clone());
        }
        let changed = self.active.as_ref() != Some(&id);
        self.active = Some(id);
        changed
    }

    pub fn reorder_tab(&mut self, source: usize, destination: usize) -> Result<(), TabError> {
        self.tab_order = reorder(&self.tab_order, source, destination)?;
        Ok(())
    }

    /// Removes `id` from the session. When it was active, focus moves to the
    /// tab on its left in the new order, then to the new first tab.
    pub fn close_tab(&mut self, id: &DocumentId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.tab_order.remove(index);
        if self.active.as_ref() == Some(id) {
            self.active = fallback_after_removal(&self.tab_order, index);
        }
        true
    }

    pub fn select_shortcut(&mut self, digit: u8) -> Option<&DocumentId> {
        if digit == 0 || digit > MAX_SHORTCUT_TAB {
            return None;
        }
        let id = self.tab_order.get(usize::from(digit) - 1)?.clone();
        self.active = Some(id);
        self.active.as_ref()
    }

    pub fn select_next(&mut self) -> Option<&DocumentId> {
        self.cycle(1)
    }

    pub fn select_previous(&mut self) -> Option<&DocumentId> {
        self.cycle(-1)
    }

    fn cycle(&mut self, delta: isize) -> Option<&DocumentId> {
        if self.tab_order.is_empty() {
            return None;
        }
        let len = self.tab_order.len() as isize;
        let current = self.active_index().map(|idx| idx as isize).unwrap_or(-1);
        let next = (current + delta).rem_euclid(len) as usize;
        self.active = Some(self.tab_order[next].clone());
        self.active.as_ref()
    }

    /// Keeps only ids accepted by `keep`, applying the close-tab focus rule
    /// for the active tab. Returns the removed ids in their former order.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<DocumentId>
    where
        F: FnMut(&DocumentId) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.tab_order.len() {
            if keep(&self.tab_order[index]) {
                index += 1;
                continue;
            }
            let id = self.tab_order.remove(index);
            if self.active.as_ref() == Some(&id) {
                self.active = fallback_after_removal(&self.tab_order, index);
            }
            removed.push(id);
        }
        removed
    }
}

fn fallback_after_removal(order: &[DocumentId], removed_index: usize) -> Option<DocumentId> {
    if order.is_empty() {
        return None;
    }
    let left = removed_index.saturating_sub(1).min(order.len() - 1);
    Some(order[left].clone())
}

/// Moves the element at `source` to `destination`, producing a new
/// permutation of `order`.
pub fn reorder<T: Clone>(order: &[T], source: usize, destination: usize) -> Result<Vec<T>, TabError> {
    let len = order.len();
    if source >= len {
        return Err(TabError::Range { index: source, len });
    }
    if destination >= len {
        return Err(TabError::Range {
            index: destination,
            len,
        });
    }
    let mut next = order.to_vec();
    let item = next.remove(source);
    next.insert(destination, item);
    Ok(next)
}
