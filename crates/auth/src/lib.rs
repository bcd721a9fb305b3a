//! `onboard-auth` — pure authorization vocabulary and policy checks.
//!
//! Nothing here touches storage or HTTP: the infra crate resolves
//! [`Capabilities`] from the entity store and the API layer maps
//! [`AuthzError`] to responses.

pub mod access;
pub mod authorize;
pub mod error;
pub mod grants;
pub mod nav;
pub mod permissions;
pub mod session;

pub use access::AccessTier;
pub use authorize::{
    authorize, authorize_role_assignment, explain_authorization, AuthorizationExplanation,
    Capabilities, ROLE_ASSIGNMENT_GRANTS,
};
pub use error::AuthzError;
pub use grants::{Grant, GrantScope};
pub use nav::{NavCategory, NavLinks};
pub use permissions::PermissionFlags;
pub use session::SessionContext;
