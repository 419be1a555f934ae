//! Sample webhook payloads for tests

use crate::Event;
use serde_json::{json, Value};

pub fn facebook_top_json(event_id: &str) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": "2025-01-15T10:00:00Z",
        "source": "facebook",
        "funnelStage": "top",
        "eventType": "ad.view",
        "data": {
            "user": {
                "userId": "fb-user-1",
                "name": "Ada Lovelace",
                "age": 29,
                "gender": "female",
                "location": { "country": "UK", "city": "London" }
            },
            "engagement": {
                "actionTime": "2025-01-15T09:59:58Z",
                "referrer": "newsfeed",
                "videoId": null
            }
        }
    })
}

pub fn facebook_bottom_json(event_id: &str, event_type: &str, amount: Option<&str>) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": "2025-01-15T10:05:00Z",
        "source": "facebook",
        "funnelStage": "bottom",
        "eventType": event_type,
        "data": {
            "user": {
                "userId": "fb-user-1",
                "name": "Ada Lovelace",
                "age": 29,
                "gender": "female",
                "location": { "country": "UK", "city": "London" }
            },
            "engagement": {
                "adId": "ad-42",
                "campaignId": "campaign-7",
                "clickPosition": "center",
                "device": "mobile",
                "browser": "Safari",
                "purchaseAmount": amount
            }
        }
    })
}

pub fn tiktok_top_json(event_id: &str) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": "2025-01-15T11:00:00Z",
        "source": "tiktok",
        "funnelStage": "top",
        "eventType": "video.view",
        "data": {
            "user": {
                "userId": "tt-user-1",
                "username": "dancer_99",
                "followers": 15400
            },
            "engagement": {
                "watchTime": 42.5,
                "percentageWatched": 87.0,
                "device": "iOS",
                "country": "US",
                "videoId": "vid-1"
            }
        }
    })
}

pub fn tiktok_purchase_json(event_id: &str, amount: Option<&str>) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": "2025-01-15T11:10:00Z",
        "source": "tiktok",
        "funnelStage": "bottom",
        "eventType": "purchase",
        "data": {
            "user": {
                "userId": "tt-user-1",
                "username": "dancer_99",
                "followers": 15400
            },
            "engagement": {
                "actionTime": "2025-01-15T11:09:30Z",
                "profileId": null,
                "purchasedItem": "sneakers",
                "purchaseAmount": amount
            }
        }
    })
}

/// Facebook user `user_id` aged `age`, with the event timestamp set to `timestamp`
pub fn facebook_user_event(event_id: &str, user_id: &str, age: u32, timestamp: &str) -> Event {
    let mut value = facebook_top_json(event_id);
    value["timestamp"] = json!(timestamp);
    value["data"]["user"]["userId"] = json!(user_id);
    value["data"]["user"]["age"] = json!(age);
    parse(value)
}

pub fn facebook_top(event_id: &str) -> Event {
    parse(facebook_top_json(event_id))
}

pub fn facebook_purchase(event_id: &str, amount: &str) -> Event {
    parse(facebook_bottom_json(event_id, "checkout.complete", Some(amount)))
}

pub fn tiktok_top(event_id: &str) -> Event {
    parse(tiktok_top_json(event_id))
}

pub fn tiktok_purchase(event_id: &str, amount: Option<&str>) -> Event {
    parse(tiktok_purchase_json(event_id, amount))
}

fn parse(value: Value) -> Event {
    match Event::from_value(value) {
        Ok(event) => event,
        Err(e) => panic!("sample event failed validation: {}", e),
    }
}
