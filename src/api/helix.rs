use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::api::{ApiError, ApiResult, Follower, FollowerPage, StreamStatus, TwitchApi};

pub const HELIX_URL: &str = "https://api.twitch.tv/helix";

/// Largest page size Helix accepts for list endpoints
const MAX_PAGE_SIZE: usize = 100;

/// Request timeout for every Helix call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Twitch Helix API client
pub struct HelixClient {
    /// Base URL, `HELIX_URL` unless overridden
    base_url: String,
    /// HTTP client carrying the auth headers
    client: Client,
    /// Broadcaster ids resolved so far, keyed by login
    broadcaster_ids: Mutex<HashMap<String, String>>,
}

impl HelixClient {
    /// Create a client authenticated with an app or user access token
    pub fn new(client_id: &str, access_token: &str) -> ApiResult<Self> {
        Self::with_base_url(HELIX_URL, client_id, access_token)
    }

    pub fn with_base_url(base_url: &str, client_id: &str, access_token: &str) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Client-Id",
            HeaderValue::from_str(client_id)
                .map_err(|e| ApiError::Decode(format!("invalid client id: {}", e)))?,
        );
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| ApiError::Decode(format!("invalid access token: {}", e)))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            broadcaster_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Perform a GET request and decode the JSON body as `T`
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status(response).await?;

        // log the rate-limit bucket when Helix reports it
        if let (Some(remaining), Some(limit)) = (
            response.headers().get("ratelimit-remaining"),
            response.headers().get("ratelimit-limit"),
        ) {
            debug!("Helix rate limit: {:?}/{:?} remaining", remaining, limit);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Resolve a channel login to its broadcaster id, caching the result
    async fn broadcaster_id(&self, channel: &str) -> ApiResult<String> {
        let login = channel.to_lowercase();
        let mut ids = self.broadcaster_ids.lock().await;
        if let Some(id) = ids.get(&login) {
            return Ok(id.clone());
        }

        let users: DataResponse<HelixUser> =
            self.get("/users", &[("login", login.clone())]).await?;
        let user = users
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::UnknownChannel(channel.to_string()))?;

        debug!("Resolved {} to broadcaster id {}", user.login, user.id);
        ids.insert(login, user.id.clone());
        Ok(user.id)
    }
}

#[async_trait]
impl TwitchApi for HelixClient {
    async fn fetch_followers(&self, channel: &str, limit: usize) -> ApiResult<FollowerPage> {
        let broadcaster_id = self.broadcaster_id(channel).await?;

        let mut page = FollowerPage::default();
        let mut cursor: Option<String> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        while page.followers.len() < limit {
            let first = (limit - page.followers.len()).min(MAX_PAGE_SIZE);
            let mut query = vec![
                ("broadcaster_id", broadcaster_id.clone()),
                ("first", first.to_string()),
            ];
            if let Some(after) = &cursor {
                query.push(("after", after.clone()));
            }

            let response: FollowersResponse = self.get("/channels/followers", &query).await?;
            page.total = response.total;
            if response.data.is_empty() {
                break;
            }
            latest = latest.max(latest_follow(&response.data));
            page.followers
                .extend(response.data.iter().map(HelixFollower::to_follower));

            cursor = response.pagination.cursor;
            if cursor.is_none() {
                break;
            }
        }

        page.followers.truncate(limit);
        debug!(
            "Fetched {} of {} followers for {}, latest follow at {:?}",
            page.followers.len(),
            page.total,
            channel,
            latest
        );
        Ok(page)
    }

    async fn fetch_stream_status(&self, channel: &str) -> ApiResult<Option<StreamStatus>> {
        let streams: DataResponse<HelixStream> = self
            .get("/streams", &[("user_login", channel.to_lowercase())])
            .await?;
        Ok(live_status(streams))
    }
}

/// Map a transport-level failure; connection problems mean the service is unreachable
fn request_error(e: reqwest::Error) -> ApiError {
    if e.is_connect() || e.is_timeout() {
        ApiError::Unavailable(e.to_string())
    } else {
        ApiError::Request(e)
    }
}

/// Turn a non-success response into an error, reading Helix's error body if present
async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<Value>().await {
        Ok(body) => body["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => String::new(),
    };

    if status.is_server_error() {
        warn!("Helix server error {}: {}", status, message);
        return Err(ApiError::Unavailable(format!("{} {}", status, message)));
    }

    error!("Helix request rejected with {}: {}", status, message);
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

/// First live entry of a `/streams` response, if any
fn live_status(streams: DataResponse<HelixStream>) -> Option<StreamStatus> {
    streams
        .data
        .into_iter()
        .find(|stream| stream.kind == "live")
        .map(|stream| StreamStatus {
            viewer_count: stream.viewer_count,
        })
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    /// "live", or an empty string when Helix reports an error state
    #[serde(rename = "type")]
    kind: String,
    viewer_count: u64,
}

#[derive(Debug, Deserialize)]
struct FollowersResponse {
    total: u64,
    data: Vec<HelixFollower>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct HelixFollower {
    user_login: String,
    /// Display name
    user_name: String,
    followed_at: DateTime<Utc>,
}

impl HelixFollower {
    fn to_follower(&self) -> Follower {
        Follower::new(Some(&self.user_name), &self.user_login)
    }
}

fn latest_follow(followers: &[HelixFollower]) -> Option<DateTime<Utc>> {
    followers.iter().map(|f| f.followed_at).max()
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}
