//! 管理员操作
//!
//! 每个管理员操作都先通过 [`AuthService::admin_guard`]：令牌有效之后还会
//! 重新读取调用者记录，确认其仍然存在、处于激活状态且仍是管理员。
//! 存储读取失败时按拒绝处理。

use shared::models::{Role, UserInfo, UserListQuery, UserListResponse, UserUpdate};
use shared::security_log;

use super::{AuthError, AuthResult, AuthService, validate_email};
use crate::storage::{UserPatch, UserRecord};

impl AuthService {
    /// Live admin check; returns the caller's current record
    pub async fn admin_guard(&self, caller_token: Option<&str>, action: &str) -> AuthResult<UserRecord> {
        let token = caller_token.ok_or(AuthError::NotAuthenticated)?;
        let claims = self.validate_token(token).await?;

        let caller = match self.users.get(&claims.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(self.admin_denied(&claims.user_id, action, "caller_deleted")),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load caller for admin check");
                return Err(self.admin_denied(&claims.user_id, action, "lookup_failed"));
            }
        };

        if !caller.is_active {
            return Err(self.admin_denied(&caller.id, action, "caller_inactive"));
        }
        if caller.role != Role::Admin {
            return Err(self.admin_denied(&caller.id, action, "not_admin"));
        }
        Ok(caller)
    }

    fn admin_denied(&self, user_id: &str, action: &str, reason: &'static str) -> AuthError {
        security_log!(WARN, "permission_denied", user_id = %user_id, action = %action, reason = reason);
        AuthError::PermissionDenied(reason.to_string())
    }

    pub async fn get_user(&self, caller_token: Option<&str>, user_id: &str) -> AuthResult<UserInfo> {
        let admin = self.admin_guard(caller_token, "get_user").await?;
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;

        security_log!(INFO, "admin_action", admin_id = %admin.id, action = "get_user", target_id = %user_id);
        Ok(user.info())
    }

    pub async fn list_users(
        &self,
        caller_token: Option<&str>,
        query: UserListQuery,
    ) -> AuthResult<UserListResponse> {
        let admin = self.admin_guard(caller_token, "list_users").await?;
        let (page, limit) = query.normalized();
        let offset = u64::from(page - 1) * u64::from(limit);

        let (records, total) = self.users.list(offset, u64::from(limit)).await?;

        security_log!(INFO, "admin_action", admin_id = %admin.id, action = "list_users", page = page, limit = limit);
        Ok(UserListResponse {
            users: records.iter().map(UserRecord::info).collect(),
            total,
            page,
            limit,
        })
    }

    pub async fn update_user(
        &self,
        caller_token: Option<&str>,
        user_id: &str,
        update: UserUpdate,
    ) -> AuthResult<UserInfo> {
        let admin = self.admin_guard(caller_token, "update_user").await?;

        if update.is_empty() {
            return Err(AuthError::Validation("no fields to update".into()));
        }

        // 先完成全部校验，再在一个写事务里应用
        let mut patch = UserPatch::default();
        let mut changed = Vec::new();
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AuthError::Validation("name must not be empty".into()));
            }
            patch.name = Some(name);
            changed.push("name");
        }
        if let Some(email) = update.email {
            validate_email(&email)?;
            patch.email = Some(email.trim().to_string());
            changed.push("email");
        }
        if let Some(role) = update.role {
            let role = role
                .parse::<Role>()
                .map_err(|e| AuthError::Validation(e.to_string()))?;
            patch.role = Some(role);
            changed.push("role");
        }
        if let Some(is_active) = update.is_active {
            patch.is_active = Some(is_active);
            changed.push("is_active");
        }

        // 邮箱冲突与用户不存在由存储层在同一事务中检查
        let user = self.users.patch(user_id, &patch).await?;

        security_log!(
            INFO,
            "admin_action",
            admin_id = %admin.id,
            action = "update_user",
            target_id = %user_id,
            fields = %changed.join(",")
        );
        Ok(user.info())
    }

    pub async fn delete_user(&self, caller_token: Option<&str>, user_id: &str) -> AuthResult<()> {
        let admin = self.admin_guard(caller_token, "delete_user").await?;

        if !self.users.delete(user_id).await? {
            return Err(AuthError::UserNotFound(user_id.to_string()));
        }

        security_log!(INFO, "admin_action", admin_id = %admin.id, action = "delete_user", target_id = %user_id);
        Ok(())
    }
}
