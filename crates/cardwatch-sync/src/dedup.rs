use std::collections::HashSet;

/// Ids already handled in one ingestion run. First sighting wins.
#[derive(Debug, Default)]
pub struct SeenIds {
    ids: HashSet<i64>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn mark(&mut self, id: i64) {
        self.ids.insert(id);
    }

    /// Marks `id` and reports whether this was its first sighting.
    pub fn first_sighting(&mut self, id: i64) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
