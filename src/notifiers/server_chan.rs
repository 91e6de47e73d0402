use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;

use crate::notifiers::{Notifier, NotifyError};

/// ServerChan push service, delivers notifications to WeChat
pub struct ServerChanNotifier {
    /// ServerChan SendKey
    key: String,
    /// HTTP client
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    code: i64,
    #[serde(default)]
    message: String,
}

impl ServerChanNotifier {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.trim().to_string(),
            client: Client::new(),
        }
    }

    /// Push endpoint for the key; `sctp<N>t...` keys use their own host
    fn endpoint(&self) -> Result<String, NotifyError> {
        if self.key.is_empty() {
            return Err(NotifyError::MissingKey);
        }

        if !self.key.starts_with("sctp") {
            return Ok(format!("https://sctapi.ftqq.com/{}.send", self.key));
        }

        let re = Regex::new(r"^sctp(\d+)t").map_err(|_| NotifyError::InvalidKey)?;
        let captures = re.captures(&self.key).ok_or(NotifyError::InvalidKey)?;
        Ok(format!(
            "https://{}.push.ft07.com/send/{}.send",
            &captures[1], self.key
        ))
    }
}

#[async_trait]
impl Notifier for ServerChanNotifier {
    async fn send(&self, title: &str, content: &str) -> Result<(), NotifyError> {
        let url = self.endpoint()?;
        let body = serde_urlencoded::to_string([("text", title), ("desp", content)])?;
        debug!("Sending ServerChan notification: {}", title);

        let res = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        let data: SendResponse = res.json().await?;
        if data.code != 0 {
            return Err(NotifyError::Rejected(data.message));
        }

        debug!("ServerChan notification delivered");
        Ok(())
    }
}
