use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::notifier::{NotificationTarget, Notifier},
    config::Config,
    error::AppError,
    models::fcm::{FcmMessage, FcmNotification, FcmRequest},
};

const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

#[derive(Clone)]
enum FcmAuth {
    Static(String),
    ApplicationDefault,
}

/// FCM HTTP v1 transport. In dry-run mode nothing leaves the process.
#[derive(Clone)]
pub struct FcmClient {
    http_client: Client,
    base_url: String,
    fcm_project_id: String,
    auth: FcmAuth,
    dry_run: bool,
}

impl FcmClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        if !config.fcm_dry_run && config.fcm_project_id.is_empty() {
            return Err(anyhow!("FCM_PROJECT_ID is required unless FCM_DRY_RUN is set"));
        }

        let auth = match &config.fcm_access_token {
            Some(token) => FcmAuth::Static(token.clone()),
            None => FcmAuth::ApplicationDefault,
        };

        info!(
            project_id = %config.fcm_project_id,
            dry_run = config.fcm_dry_run,
            "FCM client initialized"
        );

        Ok(Self {
            http_client,
            base_url: config.fcm_base_url.trim_end_matches('/').to_string(),
            fcm_project_id: config.fcm_project_id.clone(),
            auth,
            dry_run: config.fcm_dry_run,
        })
    }

    fn build_request(target: &NotificationTarget, title: &str, body: &str) -> FcmRequest {
        let (token, topic) = match target {
            NotificationTarget::Token(token) => (Some(token.clone()), None),
            NotificationTarget::Topic(topic) => (None, Some(topic.clone())),
        };

        FcmRequest {
            message: FcmMessage {
                token,
                topic,
                notification: FcmNotification {
                    title: title.to_string(),
                    body: body.to_string(),
                },
            },
        }
    }

    async fn bearer_token(&self) -> Result<String, AppError> {
        match &self.auth {
            FcmAuth::Static(token) => Ok(token.clone()),
            FcmAuth::ApplicationDefault => {
                let provider = gcp_auth::provider()
                    .await
                    .map_err(|e| AppError::Transport(format!("FCM credentials unavailable: {}", e)))?;
                let token = provider
                    .token(FCM_SCOPES)
                    .await
                    .map_err(|e| AppError::Transport(format!("FCM token fetch failed: {}", e)))?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

impl Notifier for FcmClient {
    async fn send(
        &self,
        target: &NotificationTarget,
        title: &str,
        body: &str,
    ) -> Result<(), AppError> {
        let request = Self::build_request(target, title, body);

        if self.dry_run {
            info!(%target, title, body, "[FCM DRY RUN] notification not sent");
            return Ok(());
        }

        debug!(%target, "Sending FCM push notification");

        let token = self.bearer_token().await?;
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.fcm_project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(%target, "FCM push notification sent successfully");
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(AppError::Transport(format!(
                "FCM request failed with status {}: {}",
                status, error_text
            )))
        }
    }
}
