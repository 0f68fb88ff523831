//! Permission checking for assetvault.
//!
//! This module turns a resolved project role into an allow/deny decision
//! for the three classes of operation: modify, delete and manage.

use crate::db::ProjectRole;
use crate::{Result, VaultError};

/// Check that a role is at least the required level.
///
/// # Examples
///
/// ```
/// use assetvault::auth::check_role;
/// use assetvault::db::ProjectRole;
///
/// assert!(check_role(ProjectRole::Admin, ProjectRole::Editor).is_ok());
/// assert!(check_role(ProjectRole::Viewer, ProjectRole::Editor).is_err());
/// ```
pub fn check_role(role: ProjectRole, required: ProjectRole) -> Result<()> {
    if role < required {
        return Err(VaultError::Permission(format!(
            "this operation requires the {required} role or higher"
        )));
    }
    Ok(())
}

/// Require permission to create or change content (editor and above).
pub fn require_modify(role: ProjectRole) -> Result<()> {
    if !role.can_modify() {
        return Err(VaultError::Permission(
            "you do not have permission to modify this project".to_string(),
        ));
    }
    Ok(())
}

/// Require permission to delete content (admin and above).
pub fn require_delete(role: ProjectRole) -> Result<()> {
    if !role.can_delete() {
        return Err(VaultError::Permission(
            "you do not have permission to delete in this project".to_string(),
        ));
    }
    Ok(())
}

/// Require permission to manage the project (admin and above).
pub fn require_manage(role: ProjectRole) -> Result<()> {
    if !role.can_manage() {
        return Err(VaultError::Permission(
            "you do not have permission to manage this project".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_role() {
        assert!(check_role(ProjectRole::Owner, ProjectRole::Owner).is_ok());
        assert!(check_role(ProjectRole::Editor, ProjectRole::Viewer).is_ok());

        let err = check_role(ProjectRole::Editor, ProjectRole::Admin).unwrap_err();
        assert!(matches!(err, VaultError::Permission(_)));
        assert!(err.to_string().contains("admin"));
    }

    #[test]
    fn test_require_modify() {
        assert!(require_modify(ProjectRole::Viewer).is_err());
        assert!(require_modify(ProjectRole::Editor).is_ok());
        assert!(require_modify(ProjectRole::Owner).is_ok());
    }

    #[test]
    fn test_require_delete() {
        assert!(require_delete(ProjectRole::Viewer).is_err());
        assert!(require_delete(ProjectRole::Editor).is_err());
        assert!(require_delete(ProjectRole::Admin).is_ok());
        assert!(require_delete(ProjectRole::Owner).is_ok());
    }

    #[test]
    fn test_require_manage() {
        assert!(matches!(
            require_manage(ProjectRole::Editor),
            Err(VaultError::Permission(_))
        ));
        assert!(require_manage(ProjectRole::Admin).is_ok());
    }
}
