use crate::domain::value_objects::MemberId;
use crate::ports::membership::{MembershipService as MembershipServiceTrait, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

/// Mock implementation of MembershipService
///
/// Supports stateful testing by storing member IDs.
/// Members can be registered and have their eligibility revoked.
pub struct MembershipService {
    registered_members: Mutex<HashSet<MemberId>>,
    ineligible_members: Mutex<HashSet<MemberId>>,
}

impl MembershipService {
    pub fn new() -> Self {
        Self {
            registered_members: Mutex::new(HashSet::new()),
            ineligible_members: Mutex::new(HashSet::new()),
        }
    }

    /// Register a member for testing purposes
    pub fn register_member(&self, member_id: MemberId) {
        self.registered_members.lock().unwrap().insert(member_id);
    }

    /// Mark a registered member as ineligible to borrow
    pub fn revoke_eligibility(&self, member_id: MemberId) {
        self.ineligible_members.lock().unwrap().insert(member_id);
    }
}

impl Default for MembershipService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipServiceTrait for MembershipService {
    /// Check if member exists among the registered members
    async fn exists(&self, member_id: MemberId) -> Result<bool> {
        Ok(self.registered_members.lock().unwrap().contains(&member_id))
    }

    /// Registered members are eligible unless explicitly revoked
    async fn is_eligible(&self, member_id: MemberId) -> Result<bool> {
        let registered = self.registered_members.lock().unwrap().contains(&member_id);
        let revoked = self.ineligible_members.lock().unwrap().contains(&member_id);
        Ok(registered && !revoked)
    }
}
