//! Entity store boundary.
//!
//! Persisted records for businesses, memberships, departments, roles,
//! permissions and role assignments. Every other component reads and writes
//! tenant state through [`EntityStore`]; nothing above it caches rows across
//! calls.

pub mod in_memory;
pub mod postgres;
pub mod records;
pub mod r#trait;

pub use in_memory::InMemoryEntityStore;
pub use postgres::PostgresEntityStore;
pub use records::{
    BootstrappedBusiness, Business, Department, Membership, NewBusiness, NewDepartment,
    NewMembership, NewRole, NewUserRole, Role, RoleGrant, UserRole, ADMIN_DEPARTMENT,
    GENERAL_ROLE,
};
pub use r#trait::{EntityStore, StoreError};
