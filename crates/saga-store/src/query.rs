use crate::EntityId;

/// Builder for constructing snapshot queries.
///
/// Used by operators and by recovery scans to find sagas that still have
/// work to do.
#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    /// Filter by entity ID.
    pub entity_id: Option<EntityId>,

    /// Only return snapshots of sagas that have not reached a terminal state.
    pub unfinished_only: bool,

    /// Maximum number of snapshots to return.
    pub limit: Option<usize>,
}

impl SnapshotQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for every unfinished saga.
    pub fn unfinished() -> Self {
        Self {
            unfinished_only: true,
            ..Default::default()
        }
    }

    /// Filters by entity ID.
    pub fn entity_id(mut self, id: EntityId) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Restricts the result to unfinished sagas.
    pub fn unfinished_only(mut self) -> Self {
        self.unfinished_only = true;
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if a snapshot with these attributes matches the query.
    pub fn matches(&self, entity_id: EntityId, terminal: bool) -> bool {
        if let Some(id) = self.entity_id
            && id != entity_id
        {
            return false;
        }
        !(self.unfinished_only && terminal)
    }
}
