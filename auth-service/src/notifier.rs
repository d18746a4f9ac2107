//! 一次性令牌投递
//!
//! 邮件发送属于外部协作方；默认实现只记录投递事件，令牌本身不写入日志。

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_activation(&self, email: &str, token: &str);

    async fn send_password_reset(&self, email: &str, token: &str);
}

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_activation(&self, email: &str, _token: &str) {
        tracing::info!(email = %email, "Activation token dispatched");
    }

    async fn send_password_reset(&self, email: &str, _token: &str) {
        tracing::info!(email = %email, "Password reset token dispatched");
    }
}
