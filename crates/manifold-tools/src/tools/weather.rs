use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::registry::{GatewayTool, ToolError, ToolParam};

const WEATHER_ENDPOINT: &str = "https://wttr.in";

/// Current weather lookup via wttr.in (no API key required).
pub struct GetWeather {
    client: reqwest::Client,
    endpoint: String,
}

impl GetWeather {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: WEATHER_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl GatewayTool for GetWeather {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn summary(&self) -> &str {
        "Get the current weather for a location"
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::required(
            "location",
            "string",
            "City or place name, e.g. \"Paris\"",
        )]
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let location = args
            .get("location")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::MissingArgument {
                name: "location".to_string(),
            })?;

        debug!(location, "fetching weather");

        let url = format!("{}/{}?format=j1", self.endpoint, location);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ToolError::Failed(format!(
                "weather upstream returned {}",
                resp.status().as_u16()
            )));
        }

        let parsed: WttrResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let current = parsed.current_condition.first();
        Ok(serde_json::json!({
            "location": location,
            "temperature_c": current.and_then(|c| c.temp_c.parse::<f64>().ok()),
            "condition": current
                .and_then(|c| c.weather_desc.first())
                .map(|d| d.value.clone()),
            "humidity": current.and_then(|c| c.humidity.parse::<f64>().ok()),
        }))
    }
}

#[derive(Deserialize)]
struct WttrResponse {
    #[serde(default)]
    current_condition: Vec<CurrentCondition>,
}

#[derive(Deserialize)]
struct CurrentCondition {
    #[serde(rename = "temp_C", default)]
    temp_c: String,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<WeatherDesc>,
    #[serde(default)]
    humidity: String,
}

#[derive(Deserialize)]
struct WeatherDesc {
    #[serde(default)]
    value: String,
}
