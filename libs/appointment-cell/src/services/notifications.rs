// libs/appointment-cell/src/services/notifications.rs
use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use shared_database::SupabaseClient;

use crate::models::Notification;
use crate::services::collaborators::NotificationDispatcher;

/// Writes notifications to the `notifications` table on a background task.
pub struct SupabaseNotificationDispatcher {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseNotificationDispatcher {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn deliver(supabase: Arc<SupabaseClient>, notification: Notification) {
        let body = json!({
            "tenant_id": notification.tenant_id,
            "user_id": notification.recipient_id,
            "title": notification.title,
            "message": notification.message,
            "type": notification.kind,
            "is_read": false,
        });

        let result: anyhow::Result<Vec<Value>> = supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                None,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await;

        match result {
            Ok(_) => debug!(
                "Notification '{}' delivered to {}",
                notification.kind, notification.recipient_id
            ),
            Err(e) => warn!(
                "Failed to deliver notification '{}' to {}: {}",
                notification.kind, notification.recipient_id, e
            ),
        }
    }
}

impl NotificationDispatcher for SupabaseNotificationDispatcher {
    fn notify(&self, notification: Notification) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::deliver(Arc::clone(&self.supabase), notification));
            }
            Err(_) => warn!(
                "No async runtime available; dropping notification '{}' for {}",
                notification.kind, notification.recipient_id
            ),
        }
    }
}
