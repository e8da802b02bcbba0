//! Automation CRUD handlers and wire types
//!
//! The wire shape nests the trigger and listener the way the dashboard
//! client sends them; it is mapped onto the flat [`Automation`] model here.

use autoreply_core::{
    Automation, AutomationId, AutomationStatus, DmLink, ListenerConfig, ListenerType,
    TargetScope, TriggerType,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{ApiError, AppState, Result};

const DEFAULT_NAME: &str = "Untitled automation";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerBody {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Media ids in scope, or `["all"]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram_posts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dm_links: Vec<LinkBody>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartAiBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerBody {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub listener_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SmartAiBody>,
}

/// Create or full-replace request
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trigger: Option<TriggerBody>,
    #[serde(default)]
    pub listener: Option<ListenerBody>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Automation as returned by the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResponse {
    pub id: AutomationId,
    pub name: String,
    pub trigger: TriggerBody,
    pub listener: ListenerBody,
    pub active: bool,
    pub status: AutomationStatus,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub comment_count: u64,
    pub dm_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationRequest {
    /// Validate the request and build a fresh automation from it.
    pub fn into_automation(self) -> Result<Automation> {
        let trigger = self
            .trigger
            .ok_or_else(|| ApiError::Validation("trigger is required".to_string()))?;
        let trigger_type: TriggerType = trigger
            .trigger_type
            .as_deref()
            .ok_or_else(|| ApiError::Validation("trigger.type is required".to_string()))?
            .parse()?;

        let listener = self
            .listener
            .ok_or_else(|| ApiError::Validation("listener is required".to_string()))?
            .into_config()?;

        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.to_string());
        let scope = TargetScope::from(trigger.instagram_posts.unwrap_or_default());

        Ok(Automation::new(name, trigger_type, listener)
            .with_keywords(trigger.keywords)
            .with_scope(scope)
            .with_active(self.active))
    }
}

impl ListenerBody {
    fn into_config(self) -> Result<ListenerConfig> {
        let listener_type: ListenerType = self
            .listener_type
            .as_deref()
            .ok_or_else(|| ApiError::Validation("listener.type is required".to_string()))?
            .parse()?;

        match listener_type {
            ListenerType::Message => {
                let response = self.response.unwrap_or_default();
                let message = non_blank(response.message).ok_or_else(|| {
                    ApiError::Validation("listener.response.message is required".to_string())
                })?;
                let dm_image = non_blank(response.dm_image)
                    .map(|url| web_url(url, "listener.response.dm_image"))
                    .transpose()?;
                let dm_links = response
                    .dm_links
                    .into_iter()
                    .enumerate()
                    .map(|(i, link)| link.into_link(i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ListenerConfig::Message {
                    message,
                    public_reply: non_blank(response.public_reply),
                    dm_image,
                    dm_links,
                })
            }
            ListenerType::SmartAi => {
                let config = self.config.unwrap_or_default();
                let prompt = non_blank(config.prompt).ok_or_else(|| {
                    ApiError::Validation("listener.config.prompt is required".to_string())
                })?;
                Ok(ListenerConfig::SmartAi {
                    model: non_blank(config.model),
                    prompt,
                })
            }
        }
    }
}

impl LinkBody {
    fn into_link(self, index: usize) -> Result<DmLink> {
        let field = format!("listener.response.dm_links[{}]", index);
        let title = non_blank(self.title)
            .ok_or_else(|| ApiError::Validation(format!("{}.title is required", field)))?;
        let url = non_blank(self.url)
            .ok_or_else(|| ApiError::Validation(format!("{}.url is required", field)))?;
        Ok(DmLink::new(title.trim(), web_url(url, &format!("{}.url", field))?))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accept only absolute http(s) URLs with a host.
fn web_url(url: String, field: &str) -> Result<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    let has_host = rest
        .map(|r| !r.is_empty() && !r.starts_with('/') && !r.contains(char::is_whitespace))
        .unwrap_or(false);
    if has_host {
        Ok(url.to_string())
    } else {
        Err(ApiError::Validation(format!("{} must be an http(s) URL", field)))
    }
}

impl From<&ListenerConfig> for ListenerBody {
    fn from(listener: &ListenerConfig) -> Self {
        match listener {
            ListenerConfig::Message {
                message,
                public_reply,
                dm_image,
                dm_links,
            } => ListenerBody {
                listener_type: Some(ListenerType::Message.as_str().to_string()),
                response: Some(ResponseBody {
                    message: Some(message.clone()),
                    public_reply: public_reply.clone(),
                    dm_image: dm_image.clone(),
                    dm_links: dm_links
                        .iter()
                        .map(|link| LinkBody {
                            title: Some(link.title.clone()),
                            url: Some(link.url.clone()),
                        })
                        .collect(),
                }),
                config: None,
            },
            ListenerConfig::SmartAi { model, prompt } => ListenerBody {
                listener_type: Some(ListenerType::SmartAi.as_str().to_string()),
                response: None,
                config: Some(SmartAiBody {
                    model: model.clone(),
                    prompt: Some(prompt.clone()),
                }),
            },
        }
    }
}

impl From<Automation> for AutomationResponse {
    fn from(automation: Automation) -> Self {
        let listener = ListenerBody::from(&automation.listener);
        Self {
            id: automation.id,
            name: automation.name,
            trigger: TriggerBody {
                trigger_type: Some(automation.trigger_type.as_str().to_string()),
                keywords: automation.keywords,
                instagram_posts: Some(automation.target_scope.into()),
            },
            listener,
            active: automation.active,
            status: automation.status,
            last_triggered_at: automation.last_triggered_at,
            comment_count: automation.comment_count,
            dm_count: automation.dm_count,
            created_at: automation.created_at,
            updated_at: automation.updated_at,
        }
    }
}

/// Unknown and malformed ids both resolve to 404
fn parse_id(raw: &str) -> Result<AutomationId> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("Automation {} not found", raw)))
}

pub async fn create_automation(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<AutomationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AutomationResponse>)> {
    let Json(request) = body?;
    let automation = request.into_automation()?;
    let created = state.engine.repository().create(automation).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn list_automations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AutomationResponse>>> {
    let automations = state.engine.repository().list().await?;
    Ok(Json(automations.into_iter().map(Into::into).collect()))
}

pub async fn get_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AutomationResponse>> {
    let id = parse_id(&id)?;
    state
        .engine
        .repository()
        .get(id)
        .await?
        .map(|a| Json(a.into()))
        .ok_or_else(|| ApiError::NotFound(format!("Automation {} not found", id)))
}

pub async fn update_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: std::result::Result<Json<AutomationRequest>, JsonRejection>,
) -> Result<Json<AutomationResponse>> {
    let id = parse_id(&id)?;
    let Json(request) = body?;
    let definition = request.into_automation()?;
    let updated = state.engine.repository().replace(id, definition).await?;
    Ok(Json(updated.into()))
}

pub async fn delete_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_id(&id)?;
    state.engine.repository().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> AutomationRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_message_request() {
        let automation = request(json!({
            "name": "Spring sale",
            "trigger": { "type": "comment", "keywords": [" sale ", ""], "instagram_posts": ["m1"] },
            "listener": { "type": "MESSAGE", "response": { "message": "Check DMs", "public_reply": "Sent!" } }
        }))
        .into_automation()
        .unwrap();

        assert_eq!(automation.name, "Spring sale");
        assert_eq!(automation.trigger_type, TriggerType::Comment);
        assert_eq!(automation.keywords, vec!["sale"]);
        assert_eq!(automation.target_scope, TargetScope::from(vec!["m1".to_string()]));
        assert!(automation.active);
        assert_eq!(
            automation.listener,
            ListenerConfig::Message {
                message: "Check DMs".into(),
                public_reply: Some("Sent!".into()),
                dm_image: None,
                dm_links: Vec::new(),
            }
        );
    }

    #[test]
    fn test_message_request_with_attachments() {
        let automation = request(json!({
            "trigger": { "type": "dm", "keywords": ["link"] },
            "listener": { "type": "MESSAGE", "response": {
                "message": "Here you go",
                "dm_image": " https://cdn.example.com/promo.png ",
                "dm_links": [{ "title": " Shop ", "url": "https://example.com/shop" }]
            } }
        }))
        .into_automation()
        .unwrap();

        let ListenerConfig::Message {
            dm_image, dm_links, ..
        } = &automation.listener
        else {
            panic!("expected a message listener");
        };
        assert_eq!(dm_image.as_deref(), Some("https://cdn.example.com/promo.png"));
        assert_eq!(dm_links, &vec![DmLink::new("Shop", "https://example.com/shop")]);

        let value = serde_json::to_value(AutomationResponse::from(automation)).unwrap();
        assert_eq!(
            value["listener"]["response"]["dm_links"],
            json!([{ "title": "Shop", "url": "https://example.com/shop" }])
        );
    }

    #[test]
    fn test_attachment_validation() {
        let cases = [
            json!({ "message": "x", "dm_image": "ftp://cdn.example.com/a.png" }),
            json!({ "message": "x", "dm_image": "data:image/png;base64,AAAA" }),
            json!({ "message": "x", "dm_links": [{ "title": "Shop" }] }),
            json!({ "message": "x", "dm_links": [{ "title": " ", "url": "https://example.com" }] }),
            json!({ "message": "x", "dm_links": [{ "title": "Shop", "url": "example.com" }] }),
            json!({ "message": "x", "dm_links": [{ "title": "Shop", "url": "https://" }] }),
        ];

        for response in cases {
            let result = request(json!({
                "trigger": { "type": "dm" },
                "listener": { "type": "MESSAGE", "response": response.clone() }
            }))
            .into_automation();
            assert!(
                matches!(result, Err(ApiError::Validation(_))),
                "expected validation error for {}",
                response
            );
        }
    }

    #[test]
    fn test_smart_ai_request_defaults() {
        let automation = request(json!({
            "trigger": { "type": "dm", "keywords": ["price"] },
            "listener": { "type": "SMARTAI", "config": { "prompt": "You sell shoes" } },
            "active": false
        }))
        .into_automation()
        .unwrap();

        assert_eq!(automation.name, DEFAULT_NAME);
        assert_eq!(automation.target_scope, TargetScope::All);
        assert_eq!(automation.status, AutomationStatus::Inactive);
        assert_eq!(automation.listener, ListenerConfig::smart_ai("You sell shoes"));
    }

    #[test]
    fn test_request_validation() {
        let cases = [
            json!({ "listener": { "type": "MESSAGE", "response": { "message": "x" } } }),
            json!({ "trigger": {}, "listener": { "type": "MESSAGE", "response": { "message": "x" } } }),
            json!({ "trigger": { "type": "story" }, "listener": { "type": "MESSAGE", "response": { "message": "x" } } }),
            json!({ "trigger": { "type": "dm" } }),
            json!({ "trigger": { "type": "dm" }, "listener": {} }),
            json!({ "trigger": { "type": "dm" }, "listener": { "type": "MESSAGE", "response": { "message": "  " } } }),
            json!({ "trigger": { "type": "dm" }, "listener": { "type": "SMARTAI", "config": {} } }),
        ];

        for case in cases {
            let result = request(case.clone()).into_automation();
            assert!(
                matches!(result, Err(ApiError::Validation(_))),
                "expected validation error for {}",
                case
            );
        }
    }

    #[test]
    fn test_response_shape() {
        let automation = Automation::new(
            "Greeter",
            TriggerType::Dm,
            ListenerConfig::message("Welcome!"),
        )
        .with_keywords(["hello"]);

        let value = serde_json::to_value(AutomationResponse::from(automation)).unwrap();
        assert_eq!(value["trigger"]["type"], "dm");
        assert_eq!(value["trigger"]["instagram_posts"], json!(["all"]));
        assert_eq!(value["listener"]["type"], "MESSAGE");
        assert_eq!(value["listener"]["response"]["message"], "Welcome!");
        assert_eq!(value["status"], "active");
        assert_eq!(value["commentCount"], 0);
        assert!(value["lastTriggeredAt"].is_null());
    }
}
