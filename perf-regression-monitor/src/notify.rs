//! 告警通知
//!
//! 分发是尽力而为的：通知失败只记录日志，不影响 tick 的结果。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::NotificationConfig;
use crate::error::{MonitorError, Result};
use crate::model::{Alert, AlertSeverity};

/// 通知接收端
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alerts: &[Alert]) -> Result<()>;
}

/// 把告警写入日志
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alerts: &[Alert]) -> Result<()> {
        for alert in alerts {
            match alert.severity {
                AlertSeverity::Critical => tracing::error!("[{}] {}", alert.alert_type, alert.message),
                AlertSeverity::Warning => tracing::warn!("[{}] {}", alert.alert_type, alert.message),
                AlertSeverity::Info => tracing::info!("[{}] {}", alert.alert_type, alert.message),
            }
        }
        Ok(())
    }
}

/// 以 JSON POST 发送到 webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, alerts: &[Alert]) -> Result<()> {
        let payload = serde_json::json!({
            "source": env!("CARGO_PKG_NAME"),
            "timestamp": Utc::now(),
            "critical": alerts.iter().filter(|a| a.is_critical()).count(),
            "alerts": alerts,
        });
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Notification(format!(
                "webhook {} returned {}",
                self.url, status
            )));
        }
        Ok(())
    }
}

/// 根据配置选择通知端，未配置 webhook 时使用日志
pub fn sink_from_config(config: &NotificationConfig) -> Result<Box<dyn NotificationSink>> {
    match &config.webhook_url {
        Some(url) => Ok(Box::new(WebhookSink::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Box::new(LogSink)),
    }
}

/// 尽力分发告警，返回是否成功
pub async fn dispatch(sink: &dyn NotificationSink, alerts: &[Alert]) -> bool {
    if alerts.is_empty() {
        return true;
    }
    match sink.notify(alerts).await {
        Ok(()) => {
            tracing::debug!("Dispatched {} alerts via {}", alerts.len(), sink.name());
            true
        }
        Err(e) => {
            tracing::warn!("Failed to dispatch {} alerts via {}: {}", alerts.len(), sink.name(), e);
            false
        }
    }
}
