//! TikTok event payloads

use crate::FunnelStage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TiktokEventType {
    #[serde(rename = "video.view")]
    VideoView,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "share")]
    Share,
    #[serde(rename = "comment")]
    Comment,
    #[serde(rename = "profile.visit")]
    ProfileVisit,
    #[serde(rename = "purchase")]
    Purchase,
    #[serde(rename = "follow")]
    Follow,
}

impl TiktokEventType {
    pub const ALL: [TiktokEventType; 7] = [
        Self::VideoView,
        Self::Like,
        Self::Share,
        Self::Comment,
        Self::ProfileVisit,
        Self::Purchase,
        Self::Follow,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VideoView => "video.view",
            Self::Like => "like",
            Self::Share => "share",
            Self::Comment => "comment",
            Self::ProfileVisit => "profile.visit",
            Self::Purchase => "purchase",
            Self::Follow => "follow",
        }
    }

    pub fn natural_stage(&self) -> FunnelStage {
        match self {
            Self::VideoView | Self::Like | Self::Share | Self::Comment => FunnelStage::Top,
            Self::ProfileVisit | Self::Purchase | Self::Follow => FunnelStage::Bottom,
        }
    }

    pub fn is_conversion(&self) -> bool {
        matches!(self, Self::Purchase)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokUser {
    pub user_id: String,
    pub username: String,
    pub followers: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TiktokDevice {
    Android,
    #[serde(rename = "iOS")]
    Ios,
    Desktop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TiktokTopEngagement {
    pub watch_time: f64,
    pub percentage_watched: f64,
    pub device: TiktokDevice,
    pub country: String,
    pub video_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TiktokBottomEngagement {
    pub action_time: String,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub purchased_item: Option<String>,
    #[serde(default)]
    pub purchase_amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TiktokEngagement {
    Top(TiktokTopEngagement),
    Bottom(TiktokBottomEngagement),
}

impl TiktokEngagement {
    pub(crate) fn from_value(
        stage: FunnelStage,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        match stage {
            FunnelStage::Top => serde_json::from_value(value).map(Self::Top),
            FunnelStage::Bottom => serde_json::from_value(value).map(Self::Bottom),
        }
    }

    pub fn purchase_amount(&self) -> Option<&str> {
        match self {
            Self::Bottom(bottom) => bottom.purchase_amount.as_deref(),
            Self::Top(_) => None,
        }
    }
}
