//! Ownership rules applied to every table and to the object store.
//!
//! - profile, role and book rows are visible only to their owning identity;
//!   services bind the caller id into every query and use these predicates
//!   for rows already in hand
//! - role rows are additionally fully visible and mutable for admins
//! - stored objects belong to the identity named by the first segment of
//!   their path, so `{user_id}/...` is the only namespace a caller may touch

use crate::{auth::Caller, models::user::Role};
use uuid::Uuid;

/// Row rule shared by profiles, roles and books.
pub fn owns_row(caller: &Caller, owner_id: Uuid) -> bool {
    caller.user_id == owner_id
}

/// Role rows: own rows, or everything for admins.
pub fn can_view_role_row(caller: &Caller, caller_roles: &[Role], row_owner: Uuid) -> bool {
    owns_row(caller, row_owner) || caller_roles.contains(&Role::Admin)
}

/// Only admins may insert or delete role rows.
pub fn can_manage_roles(caller_roles: &[Role]) -> bool {
    caller_roles.contains(&Role::Admin)
}

/// First path segment of an object name, if any.
pub fn object_owner_segment(object_name: &str) -> Option<&str> {
    object_name.split('/').next().filter(|s| !s.is_empty())
}

/// Object rule for select, insert and delete.
pub fn can_access_object(caller: &Caller, object_name: &str) -> bool {
    object_owner_segment(object_name)
        .and_then(|segment| Uuid::parse_str(segment).ok())
        .is_some_and(|owner| owns_row(caller, owner))
}
