//! 灯光控制工具（control_light）
//!
//! 配置了 Home Assistant 地址时调用其 REST 服务接口 `light.turn_on / turn_off / toggle`；
//! 否则使用进程内模拟中枢记录每个房间的灯光状态，便于离线运行与测试。

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use crate::tools::{ParamType, Tool, ToolError, ToolParameter};
use crate::workflow::TaskContext;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LightState {
    pub on: bool,
    pub brightness: Option<u8>,
}

enum Backend {
    Simulated(RwLock<HashMap<String, LightState>>),
    HomeAssistant {
        client: Client,
        base_url: String,
        token: String,
    },
}

pub struct SmartHomeTool {
    backend: Backend,
}

impl SmartHomeTool {
    pub fn simulated() -> Self {
        Self {
            backend: Backend::Simulated(RwLock::new(HashMap::new())),
        }
    }

    pub fn home_assistant(
        base_url: &str,
        token: &str,
        timeout_secs: u64,
    ) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;
        Ok(Self {
            backend: Backend::HomeAssistant {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                token: token.to_string(),
            },
        })
    }

    /// 模拟中枢中某个房间的状态；Home Assistant 后端返回 None
    pub fn light_state(&self, room: &str) -> Option<LightState> {
        match &self.backend {
            Backend::Simulated(lights) => lights
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&room.to_lowercase())
                .copied(),
            Backend::HomeAssistant { .. } => None,
        }
    }
}

fn entity_id(room: &str) -> String {
    let slug: String = room
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("light.{slug}")
}

#[async_trait]
impl Tool for SmartHomeTool {
    fn id(&self) -> &str {
        "control_light"
    }

    fn name(&self) -> &str {
        "Light control"
    }

    fn description(&self) -> &str {
        "Turn a room's lights on, off, or toggle them; optionally set brightness (0-100)."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("room", ParamType::String, "Room name, e.g. kitchen"),
            ToolParameter::optional("action", ParamType::String, "on, off or toggle")
                .with_default(json!("on"))
                .with_enum(vec![json!("on"), json!("off"), json!("toggle")]),
            ToolParameter::optional("brightness", ParamType::Number, "Brightness percent 0-100"),
        ]
    }

    async fn execute(&self, params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        let room = params["room"].as_str().unwrap_or_default().trim().to_lowercase();
        if room.is_empty() {
            return Err(ToolError::InvalidParams("room must not be empty".into()));
        }
        let action = params["action"].as_str().unwrap_or("on");
        let brightness = params["brightness"]
            .as_f64()
            .map(|b| b.clamp(0.0, 100.0) as u8);

        match &self.backend {
            Backend::Simulated(lights) => {
                let mut lights = lights.write().unwrap_or_else(PoisonError::into_inner);
                let state = lights.entry(room.clone()).or_insert(LightState {
                    on: false,
                    brightness: None,
                });
                state.on = match action {
                    "off" => false,
                    "toggle" => !state.on,
                    _ => true,
                };
                if brightness.is_some() {
                    state.brightness = brightness;
                }
                Ok(json!({ "room": room, "state": *state, "simulated": true }))
            }
            Backend::HomeAssistant {
                client,
                base_url,
                token,
            } => {
                let service = match action {
                    "off" => "turn_off",
                    "toggle" => "toggle",
                    _ => "turn_on",
                };
                let mut body = json!({ "entity_id": entity_id(&room) });
                if let (Some(b), "turn_on") = (brightness, service) {
                    body["brightness_pct"] = json!(b);
                }
                let resp = client
                    .post(format!("{base_url}/api/services/light/{service}"))
                    .bearer_auth(token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(ToolError::ExecutionFailed(format!(
                        "home assistant returned {status}"
                    )));
                }
                Ok(json!({ "room": room, "service": service, "entity_id": body["entity_id"] }))
            }
        }
    }

    fn estimate_duration(&self, _params: &Value) -> u64 {
        500
    }
}
