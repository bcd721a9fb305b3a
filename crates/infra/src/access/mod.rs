//! Store-backed authorization components.
//!
//! Each component owns a handle to the [`EntityStore`](crate::store::EntityStore)
//! and re-reads state on every call. [`AuthorizationGate`] composes them and
//! is what the HTTP layer talks to.

pub mod aggregator;
pub mod context;
pub mod gate;
pub mod hierarchy;
pub mod invitation;
pub mod membership;
pub mod primary_role;
pub mod registration;
pub mod structure;

#[cfg(test)]
pub(crate) mod fixtures;

pub use aggregator::PermissionAggregator;
pub use context::BusinessContextSwitcher;
pub use gate::AuthorizationGate;
pub use hierarchy::DepartmentHierarchy;
pub use invitation::{Invitation, Invitations, INVITATION_TTL_HOURS};
pub use membership::{MembershipResolver, MembershipSummary};
pub use primary_role::PrimaryRoleTracker;
pub use registration::{BusinessRegistration, Registered};
pub use structure::{Lockable, StructureGuard};

use onboard_auth::AuthzError;

use crate::store::StoreError;

/// Log a store failure and turn it into the caller-facing error.
pub(crate) fn store_failure(operation: &'static str, err: StoreError) -> AuthzError {
    tracing::error!(operation, error = %err, "entity store failure");
    AuthzError::Database(format!("{operation}: {err}"))
}
