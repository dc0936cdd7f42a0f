//! Notification side-effect sink
//!
//! Turns delivered [`Notification`]s into platform notifications. Whether
//! anything is displayed depends on a permission state held by the surface.
//! Showing and asking for permission are async, so [`SurfaceSink`] hands
//! each notification to a background worker and `present` never blocks
//! dispatch.

mod surface;

pub use surface::TracingSurface;

use crate::error::Result;
use crate::payload::{Notification, NotificationType};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Icon and badge used unless configured otherwise
pub const DEFAULT_ICON: &str = "/logo.png";

/// Whether the user allowed notifications to be displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Unasked,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
            PermissionState::Unasked => "unasked",
        };
        f.write_str(s)
    }
}

/// What gets displayed for one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Replaces an earlier notification with the same tag
    pub tag: String,
    /// Stays on screen until dismissed
    pub require_interaction: bool,
}

impl NotificationDescriptor {
    pub fn compose(notification: &Notification, icon: &str) -> Self {
        Self {
            title: notification.title.clone(),
            body: notification.message.clone().unwrap_or_default(),
            icon: icon.to_string(),
            badge: icon.to_string(),
            tag: notification.id.to_string(),
            require_interaction: notification.kind == NotificationType::Alert,
        }
    }
}

/// Where notifications are displayed
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    /// Current permission, without prompting
    async fn permission(&self) -> PermissionState;

    /// Ask the user for permission and return the outcome
    async fn request_permission(&self) -> PermissionState;

    /// Display a notification
    async fn show(&self, descriptor: &NotificationDescriptor) -> Result<()>;
}

/// Receives every notification delivered to a user's topic
pub trait NotificationSink: Send + Sync {
    /// Must not block
    fn present(&self, notification: &Notification);
}

/// Sink that displays notifications on a [`NotificationSurface`]
///
/// Granted: shown. Unasked: permission is requested and the notification
/// skipped. Denied: skipped. Notifications are handled in delivery order.
#[derive(Clone)]
pub struct SurfaceSink {
    surface: Arc<dyn NotificationSurface>,
    icon: String,
    queue: mpsc::UnboundedSender<NotificationDescriptor>,
}

impl SurfaceSink {
    /// Start the sink's worker on the current tokio runtime
    pub fn spawn<S>(surface: S) -> Self
    where
        S: NotificationSurface + 'static,
    {
        let surface: Arc<dyn NotificationSurface> = Arc::new(surface);
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(surface.clone(), rx));

        Self {
            surface,
            icon: DEFAULT_ICON.to_string(),
            queue,
        }
    }

    /// Use `icon` as both icon and badge
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    /// Ask for permission up front
    pub async fn request_permission(&self) -> PermissionState {
        self.surface.request_permission().await
    }

    pub async fn permission(&self) -> PermissionState {
        self.surface.permission().await
    }
}

impl NotificationSink for SurfaceSink {
    fn present(&self, notification: &Notification) {
        let descriptor = NotificationDescriptor::compose(notification, &self.icon);
        if self.queue.send(descriptor).is_err() {
            warn!(id = notification.id, "Notification worker stopped, dropping notification");
        }
    }
}

async fn run_worker(
    surface: Arc<dyn NotificationSurface>,
    mut rx: mpsc::UnboundedReceiver<NotificationDescriptor>,
) {
    while let Some(descriptor) = rx.recv().await {
        match surface.permission().await {
            PermissionState::Granted => {
                if let Err(e) = surface.show(&descriptor).await {
                    warn!(tag = %descriptor.tag, error = %e, "Failed to show notification");
                }
            }
            PermissionState::Unasked => {
                let outcome = surface.request_permission().await;
                info!(permission = %outcome, "Requested notification permission");
                debug!(tag = %descriptor.tag, "Skipped notification while permission was unasked");
            }
            PermissionState::Denied => {
                debug!(tag = %descriptor.tag, "Notification permission denied, skipping");
            }
        }
    }
}
