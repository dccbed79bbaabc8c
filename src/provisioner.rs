//! Room provisioning
//!
//! The engine never touches audio itself. It asks a `RoomProvisioner` for a
//! room per session and hands the resulting URL to the participants.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ProvisionError;
use crate::types::RoomName;

/// Default Daily REST endpoint
pub const DAILY_API_BASE: &str = "https://api.daily.co/v1";

/// Per-request timeout for provider calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum participants allowed into a provisioned room
const MAX_PARTICIPANTS: u32 = 10;

/// Reference to a provisioned room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomHandle {
    /// Name the provider knows the room by
    pub name: String,
    /// URL handed to participants
    pub url: String,
    /// True when the provider was bypassed and nothing needs releasing
    pub degraded: bool,
}

/// Allocates and releases communication rooms
#[async_trait]
pub trait RoomProvisioner: Send + Sync {
    /// Create a room, preferably under the requested name
    async fn create_room(&self, name: &RoomName) -> Result<RoomHandle, ProvisionError>;

    /// Release a room created earlier
    async fn destroy_room(&self, room: &RoomHandle) -> Result<(), ProvisionError>;

    /// Deterministic room to use when creation fails
    ///
    /// `None` means there is no usable substitute.
    fn fallback_room(&self, name: &RoomName) -> Option<RoomHandle>;
}

fn daily_room_url(domain: &str, name: &str) -> String {
    format!("https://{}.daily.co/{}", domain, name)
}

/// Provisioner that only hands out deterministic room URLs
///
/// Used when no API key is configured.
#[derive(Debug, Clone)]
pub struct StaticProvisioner {
    domain: String,
}

impl StaticProvisioner {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }
}

#[async_trait]
impl RoomProvisioner for StaticProvisioner {
    async fn create_room(&self, name: &RoomName) -> Result<RoomHandle, ProvisionError> {
        Ok(RoomHandle {
            name: name.to_string(),
            url: daily_room_url(&self.domain, name.as_str()),
            degraded: true,
        })
    }

    async fn destroy_room(&self, _room: &RoomHandle) -> Result<(), ProvisionError> {
        Ok(())
    }

    fn fallback_room(&self, name: &RoomName) -> Option<RoomHandle> {
        Some(RoomHandle {
            name: name.to_string(),
            url: daily_room_url(&self.domain, name.as_str()),
            degraded: true,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateRoomRequest<'a> {
    name: &'a str,
    privacy: &'static str,
    properties: RoomProperties,
}

#[derive(Debug, Serialize)]
struct RoomProperties {
    enable_chat: bool,
    enable_screenshare: bool,
    enable_recording: bool,
    start_video_off: bool,
    start_audio_off: bool,
    enable_prejoin_ui: bool,
    enable_network_ui: bool,
    enable_people_ui: bool,
    exp: u64,
    eject_at_room_exp: bool,
    enable_knocking: bool,
    max_participants: u32,
}

impl RoomProperties {
    /// Audio-only room that expires `expiry` from now
    fn audio_only(expiry: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            enable_chat: false,
            enable_screenshare: false,
            enable_recording: false,
            start_video_off: true,
            start_audio_off: false,
            enable_prejoin_ui: false,
            enable_network_ui: true,
            enable_people_ui: true,
            exp: (now + expiry).as_secs(),
            eject_at_room_exp: true,
            enable_knocking: false,
            max_participants: MAX_PARTICIPANTS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedRoom {
    name: String,
    url: String,
}

/// Provisioner backed by the Daily REST API
#[derive(Debug, Clone)]
pub struct DailyProvisioner {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    domain: String,
    room_expiry: Duration,
}

impl DailyProvisioner {
    /// Build a provisioner for the given account
    pub fn new(
        api_key: impl Into<String>,
        domain: impl Into<String>,
        room_expiry: Duration,
    ) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: DAILY_API_BASE.to_string(),
            api_key: api_key.into(),
            domain: domain.into(),
            room_expiry,
        })
    }

    /// Point the provisioner at a different API endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl RoomProvisioner for DailyProvisioner {
    async fn create_room(&self, name: &RoomName) -> Result<RoomHandle, ProvisionError> {
        let body = CreateRoomRequest {
            name: name.as_str(),
            privacy: "public",
            properties: RoomProperties::audio_only(self.room_expiry),
        };

        let response = self
            .client
            .post(format!("{}/rooms", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatedRoom = response.json().await?;
        info!("Created room {} at {}", created.name, created.url);
        Ok(RoomHandle {
            name: created.name,
            url: created.url,
            degraded: false,
        })
    }

    async fn destroy_room(&self, room: &RoomHandle) -> Result<(), ProvisionError> {
        if room.degraded {
            debug!("Room {} was never provisioned, nothing to release", room.name);
            return Ok(());
        }

        let response = self
            .client
            .delete(format!("{}/rooms/{}", self.api_base, room.name))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Released room {}", room.name);
        Ok(())
    }

    fn fallback_room(&self, name: &RoomName) -> Option<RoomHandle> {
        Some(RoomHandle {
            name: name.to_string(),
            url: daily_room_url(&self.domain, name.as_str()),
            degraded: true,
        })
    }
}
