use crate::error::AppError;
use crate::routes::role::model::Permission;
use crate::routes::session::model::Session;

/// 请求闸门：会话无效或缺少所需权限都拒绝。
/// 未认证与权限不足对客户端刻意不可区分，同样的 401。
pub fn authorize(session: &Session, permission: Option<Permission>) -> Result<(), AppError> {
    if !session.is_valid {
        return Err(AppError::Unauthorized);
    }
    if let Some(permission) = permission {
        if !session.has_permission(permission) {
            return Err(AppError::Unauthorized);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(permissions: &[&str]) -> Session {
        Session {
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
            is_valid: true,
            ..Session::default()
        }
    }

    #[test]
    fn anonymous_is_rejected_even_without_permission_requirement() {
        let session = Session::default();
        assert!(matches!(
            authorize(&session, None),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn valid_session_passes_when_no_permission_required() {
        assert!(authorize(&session_with(&[]), None).is_ok());
    }

    #[test]
    fn missing_permission_is_indistinguishable_from_anonymous() {
        let denied = authorize(&session_with(&["USER_READ"]), Some(Permission::UserDelete));
        let anonymous = authorize(&Session::default(), Some(Permission::UserDelete));
        assert!(matches!(denied, Err(AppError::Unauthorized)));
        assert!(matches!(anonymous, Err(AppError::Unauthorized)));
    }

    #[test]
    fn held_permission_passes() {
        let session = session_with(&["USER_READ", "AUDIT_READ"]);
        assert!(authorize(&session, Some(Permission::AuditRead)).is_ok());
    }
}
