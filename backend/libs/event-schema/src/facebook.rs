//! Facebook event payloads

use crate::FunnelStage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacebookEventType {
    #[serde(rename = "ad.view")]
    AdView,
    #[serde(rename = "page.like")]
    PageLike,
    #[serde(rename = "comment")]
    Comment,
    #[serde(rename = "video.view")]
    VideoView,
    #[serde(rename = "ad.click")]
    AdClick,
    #[serde(rename = "form.submission")]
    FormSubmission,
    #[serde(rename = "checkout.complete")]
    CheckoutComplete,
}

impl FacebookEventType {
    pub const ALL: [FacebookEventType; 7] = [
        Self::AdView,
        Self::PageLike,
        Self::Comment,
        Self::VideoView,
        Self::AdClick,
        Self::FormSubmission,
        Self::CheckoutComplete,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdView => "ad.view",
            Self::PageLike => "page.like",
            Self::Comment => "comment",
            Self::VideoView => "video.view",
            Self::AdClick => "ad.click",
            Self::FormSubmission => "form.submission",
            Self::CheckoutComplete => "checkout.complete",
        }
    }

    /// Funnel stage whose engagement shape this event type carries
    pub fn natural_stage(&self) -> FunnelStage {
        match self {
            Self::AdView | Self::PageLike | Self::Comment | Self::VideoView => FunnelStage::Top,
            Self::AdClick | Self::FormSubmission | Self::CheckoutComplete => FunnelStage::Bottom,
        }
    }

    pub fn is_conversion(&self) -> bool {
        matches!(self, Self::CheckoutComplete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::NonBinary => "non-binary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacebookLocation {
    pub country: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookUser {
    pub user_id: String,
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub location: FacebookLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Referrer {
    Newsfeed,
    Marketplace,
    Groups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickPosition {
    TopLeft,
    BottomRight,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacebookDevice {
    Mobile,
    Desktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FacebookTopEngagement {
    pub action_time: String,
    pub referrer: Referrer,
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FacebookBottomEngagement {
    pub ad_id: String,
    pub campaign_id: String,
    pub click_position: ClickPosition,
    pub device: FacebookDevice,
    pub browser: Browser,
    #[serde(default)]
    pub purchase_amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FacebookEngagement {
    Top(FacebookTopEngagement),
    Bottom(FacebookBottomEngagement),
}

impl FacebookEngagement {
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

    pub fn campaign_id(&self) -> Option<&str> {
        match self {
            Self::Bottom(bottom) => Some(bottom.campaign_id.as_str()),
            Self::Top(_) => None,
        }
    }
}
