//! Live view of one project's content.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{ApiClient, ClientError};
use crate::models::ProjectContent;

/// Polls a project's content revision and publishes new snapshots.
///
/// The background task lives exactly as long as this value: dropping the
/// subscription aborts it.
pub struct ProjectSubscription {
    project_id: String,
    receiver: watch::Receiver<Option<ProjectContent>>,
    task: JoinHandle<()>,
}

impl ProjectSubscription {
    /// Start polling `project_id`, treating `seen_version` as already delivered.
    pub fn spawn(api: ApiClient, project_id: &str, seen_version: i64, interval: Duration) -> Self {
        let (sender, receiver) = watch::channel(None);
        let id = project_id.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_version = seen_version;

            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }

                let revision = match api.get_content_revision(&id).await {
                    Ok(revision) => revision,
                    Err(e) => {
                        tracing::warn!(project_id = %id, "Revision poll failed: {}", e);
                        continue;
                    }
                };
                if revision.version == last_version {
                    continue;
                }

                match api.get_project_content(&id).await {
                    Ok(content) => {
                        last_version = content.version;
                        tracing::debug!(project_id = %id, version = last_version, "Project content changed");
                        if sender.send(Some(content)).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(project_id = %id, "Content fetch failed: {}", e),
                }
            }
        });

        Self {
            project_id: project_id.to_string(),
            receiver,
            task,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    #[cfg(test)]
    pub(crate) fn abort_handle(&self) -> tokio::task::AbortHandle {
        self.task.abort_handle()
    }

    /// Wait for the next content snapshot.
    pub async fn next(&mut self) -> Result<ProjectContent, ClientError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| ClientError::SubscriptionClosed)?;
        self.receiver
            .borrow_and_update()
            .clone()
            .ok_or(ClientError::SubscriptionClosed)
    }
}

impl Drop for ProjectSubscription {
    fn drop(&mut self) {
        tracing::debug!(project_id = %self.project_id, "Releasing project subscription");
        self.task.abort();
    }
}
