//! Authorization module for assetvault.
//!
//! Authentication happens outside this crate; callers arrive with a user ID.
//! This module resolves that user's role in a project and checks it against
//! the operation being attempted.

mod access;
pub mod permission;

pub use access::{AccessControl, MemberAccess};
pub use permission::{check_role, require_delete, require_manage, require_modify};
