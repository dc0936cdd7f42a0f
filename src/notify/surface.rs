use crate::error::Result;
use crate::notify::{NotificationDescriptor, NotificationSurface, PermissionState};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// Displays notifications as `tracing` events
///
/// There is nobody to prompt, so a permission request simply grants.
#[derive(Debug)]
pub struct TracingSurface {
    permission: Mutex<PermissionState>,
}

impl TracingSurface {
    pub fn new(permission: PermissionState) -> Self {
        Self {
            permission: Mutex::new(permission),
        }
    }
}

impl Default for TracingSurface {
    fn default() -> Self {
        Self::new(PermissionState::Granted)
    }
}

#[async_trait]
impl NotificationSurface for TracingSurface {
    async fn permission(&self) -> PermissionState {
        *self.permission.lock()
    }

    async fn request_permission(&self) -> PermissionState {
        let mut permission = self.permission.lock();
        if *permission == PermissionState::Unasked {
            *permission = PermissionState::Granted;
        }
        *permission
    }

    async fn show(&self, descriptor: &NotificationDescriptor) -> Result<()> {
        info!(
            tag = %descriptor.tag,
            title = %descriptor.title,
            body = %descriptor.body,
            require_interaction = descriptor.require_interaction,
            "Notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_grants_only_when_unasked() {
        let surface = TracingSurface::new(PermissionState::Unasked);
        assert_eq!(surface.request_permission().await, PermissionState::Granted);
        assert_eq!(surface.permission().await, PermissionState::Granted);

        let surface = TracingSurface::new(PermissionState::Denied);
        assert_eq!(surface.request_permission().await, PermissionState::Denied);
    }

    #[tokio::test]
    async fn test_show_succeeds() {
        let surface = TracingSurface::default();
        let descriptor = NotificationDescriptor {
            title: "Lending due".to_string(),
            body: "Repayment due tomorrow".to_string(),
            icon: "/logo.png".to_string(),
            badge: "/logo.png".to_string(),
            tag: "3".to_string(),
            require_interaction: false,
        };
        assert!(surface.show(&descriptor).await.is_ok());
    }
}
