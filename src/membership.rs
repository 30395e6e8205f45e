//! Store membership lookups.
//!
//! Payment initiation is gated on the caller belonging to the store being
//! paid for. Implement [`MembershipStore`] over wherever your application
//! keeps its store staff records.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trait for membership lookups.
///
/// Any role is sufficient to initiate a payment; the services only ask
/// whether a membership exists.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Get a user's membership in a store.
    async fn get_membership(
        &self,
        store_id: &str,
        user_id: &str,
    ) -> Result<Option<StoreMembership>>;

    /// Check if a user belongs to a store, in any role.
    async fn is_member(&self, store_id: &str, user_id: &str) -> Result<bool> {
        Ok(self.get_membership(store_id, user_id).await?.is_some())
    }
}

/// One user-store-role association.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreMembership {
    /// The store.
    pub store_id: String,
    /// The member.
    pub user_id: String,
    /// The member's role in the store.
    pub role: StoreRole,
    /// When the membership was created.
    pub joined_at: DateTime<Utc>,
}

/// Role of a user within a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreRole {
    /// Store owner.
    Owner,
    /// Administrator.
    Admin,
    /// Regular staff member.
    #[default]
    Staff,
}

impl StoreRole {
    /// Get the string representation of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Staff => "staff",
        }
    }
}

/// Error returned when parsing a role string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError {
    invalid_value: String,
}

impl fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid role: '{}' (expected: owner, admin, or staff)",
            self.invalid_value
        )
    }
}

impl std::error::Error for ParseRoleError {}

impl FromStr for StoreRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "staff" => Ok(Self::Staff),
            _ => Err(ParseRoleError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// In-memory membership store for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory membership store for testing.
    ///
    /// Wraps data in Arc for cheap cloning.
    #[derive(Default, Clone)]
    pub struct InMemoryMembershipStore {
        inner: Arc<InMemoryMembershipStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryMembershipStoreInner {
        memberships: RwLock<HashMap<(String, String), StoreMembership>>,
    }

    impl InMemoryMembershipStore {
        /// Create a new in-memory store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a membership (for testing).
        pub fn add_member(&self, store_id: &str, user_id: &str, role: StoreRole) {
            let membership = StoreMembership {
                store_id: store_id.to_string(),
                user_id: user_id.to_string(),
                role,
                joined_at: Utc::now(),
            };
            self.inner
                .memberships
                .write()
                .unwrap()
                .insert((store_id.to_string(), user_id.to_string()), membership);
        }

        /// Remove a membership (for testing).
        pub fn remove_member(&self, store_id: &str, user_id: &str) {
            self.inner
                .memberships
                .write()
                .unwrap()
                .remove(&(store_id.to_string(), user_id.to_string()));
        }
    }

    #[async_trait]
    impl MembershipStore for InMemoryMembershipStore {
        async fn get_membership(
            &self,
            store_id: &str,
            user_id: &str,
        ) -> Result<Option<StoreMembership>> {
            Ok(self
                .inner
                .memberships
                .read()
                .unwrap()
                .get(&(store_id.to_string(), user_id.to_string()))
                .cloned())
        }
    }
}
