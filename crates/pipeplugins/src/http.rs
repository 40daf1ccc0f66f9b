use async_trait::async_trait;
use pipecore::{
    InitContext, Message, Params, Plugin, PluginError, StageConfig, StageContext, Value,
};
use piperuntime::{PluginFactory, PluginMetadata};

/// HTTP request stage.
///
/// The URL comes from the stage config or from `data.url`; a `data.body`
/// is sent as JSON for POST and PUT. The response replaces the data as
/// `{status, headers, body}`.
#[derive(Clone)]
pub struct HttpRequest {
    client: reqwest::Client,
    method: String,
    url: Option<String>,
    headers: Params,
}

impl HttpRequest {
    fn target_url<'a>(&'a self, data: &'a Value) -> Result<&'a str, PluginError> {
        self.url
            .as_deref()
            .or_else(|| data.get("url").and_then(|v| v.as_str()))
            .ok_or_else(|| PluginError::InvalidInput {
                field: "url".to_string(),
                expected: "string".to_string(),
            })
    }
}

#[async_trait]
impl Plugin for HttpRequest {
    fn plugin_type(&self) -> &str {
        "http.request"
    }

    async fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), PluginError> {
        if let Some(client) = ctx.resources.get::<reqwest::Client>() {
            self.client = client.as_ref().clone();
        }
        Ok(())
    }

    async fn run(&self, ctx: &StageContext, msg: &mut Message) -> Result<(), PluginError> {
        let url = self.target_url(&msg.data)?.to_string();
        ctx.events().info(format!("{} {}", self.method, url));

        let body = msg.data.get("body");
        let request = match self.method.as_str() {
            "GET" => self.client.get(&url),
            "DELETE" => self.client.delete(&url),
            "POST" | "PUT" => {
                let req = if self.method == "POST" {
                    self.client.post(&url)
                } else {
                    self.client.put(&url)
                };
                match body {
                    Some(Value::String(text)) => req.body(text.clone()),
                    Some(json) => req.json(json),
                    None => req,
                }
            }
            other => {
                return Err(PluginError::Configuration(format!(
                    "Unsupported method: {}",
                    other
                )))
            }
        };

        let request = self.headers.iter().fold(request, |req, (key, value)| match value.as_str() {
            Some(value) => req.header(key.as_str(), value),
            None => req,
        });

        let response = request
            .send()
            .await
            .map_err(|e| PluginError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: Params = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| PluginError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        ctx.events().info(format!("Response status: {}", status));
        msg.data = serde_json::json!({
            "status": status,
            "headers": headers,
            "body": body,
        });
        ctx.sink(msg).await;
        Ok(())
    }
}

pub struct HttpRequestFactory;

impl PluginFactory for HttpRequestFactory {
    fn create(&self, config: &StageConfig) -> Result<Box<dyn Plugin>, PluginError> {
        let method = config
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();
        let headers = match config.get("headers") {
            Some(Value::Object(headers)) => headers.clone(),
            None | Some(Value::Null) => Params::new(),
            Some(_) => {
                return Err(PluginError::InvalidInput {
                    field: "headers".to_string(),
                    expected: "map".to_string(),
                })
            }
        };
        Ok(Box::new(HttpRequest {
            client: reqwest::Client::new(),
            method,
            url: config.get("url").and_then(|v| v.as_str()).map(str::to_string),
            headers,
        }))
    }

    fn plugin_type(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }
}
