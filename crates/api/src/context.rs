use journal_core::OwnerId;

/// Owner context for a request.
///
/// Inserted by the owner middleware from the trusted `X-User-Id` header and
/// required by every journal route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerContext {
    owner_id: OwnerId,
}

impl OwnerContext {
    pub fn new(owner_id: OwnerId) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }
}
