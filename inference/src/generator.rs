use crate::error::{InferenceError, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// A pretrained text-generation model. Sampling is enabled, so repeated
/// calls with the same prompt are not expected to agree.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_id(&self) -> &str;

    /// Where the model runs, as reported in the metrics.
    fn compute_device(&self) -> &str {
        "cpu"
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

/// Client for a Hugging Face text-generation-inference server.
pub struct TgiGenerator {
    http: reqwest::Client,
    endpoint: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    model_id: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    do_sample: bool,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generated_text: String,
}

impl<'a> GenerateRequest<'a> {
    fn new(prompt: &'a str, params: &GenerationParams) -> Self {
        Self {
            inputs: prompt,
            parameters: GenerateParameters {
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
                do_sample: true,
                return_full_text: true,
            },
        }
    }
}

impl TgiGenerator {
    /// Check that the server at `endpoint` is up and serving a model.
    ///
    /// # Errors
    /// Returns [`InferenceError::Load`] if the server cannot be reached or
    /// does not answer `/info`.
    pub async fn connect(endpoint: &str, model_id: &str) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let load_error = |source| InferenceError::Load {
            model: model_id.to_string(),
            endpoint: endpoint.clone(),
            source,
        };

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(load_error)?;

        let info: ServerInfo = http
            .get(format!("{}/info", endpoint))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(load_error)?
            .json()
            .await
            .map_err(load_error)?;

        if info.model_id != model_id {
            warn!(
                "Generation server at {} serves {}, not the configured {}",
                endpoint, info.model_id, model_id
            );
        }
        info!("Connected to generation server at {} ({})", endpoint, info.model_id);

        Ok(Self {
            http,
            endpoint,
            model_id: info.model_id,
        })
    }
}

#[async_trait]
impl TextGenerator for TgiGenerator {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/generate", self.endpoint))
            .json(&GenerateRequest::new(prompt, params))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(InferenceError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.generated_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body() {
        let params = GenerationParams {
            max_new_tokens: 128,
            temperature: 0.5,
            top_p: 0.9,
        };
        let body = serde_json::to_value(GenerateRequest::new("Assessment: ", &params)).unwrap();

        assert_eq!(body["inputs"], "Assessment: ");
        assert_eq!(body["parameters"]["max_new_tokens"], 128);
        assert_eq!(body["parameters"]["temperature"], 0.5);
        assert_eq!(body["parameters"]["do_sample"], true);
        assert_eq!(body["parameters"]["return_full_text"], true);
    }

    #[test]
    fn test_response_parsing() {
        let body = json!({"generated_text": "All readings nominal."});
        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.generated_text, "All readings nominal.");
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_to_load() {
        let result = TgiGenerator::connect("http://127.0.0.1:9/", "microsoft/Phi-3.5-mini-instruct").await;

        match result {
            Err(InferenceError::Load { model, endpoint, .. }) => {
                assert_eq!(model, "microsoft/Phi-3.5-mini-instruct");
                assert_eq!(endpoint, "http://127.0.0.1:9");
            }
            _ => panic!("expected a load error"),
        }
    }
}
