//! OpenAI 兼容的图像能力
//!
//! 文生图走 images/generations（reqwest JSON 调用）；看图走 async_openai 的 chat completion，
//! 用户消息携带 text + image_url 两个内容片段。openai / azure 两种风格与传输层共用同一份连接参数。

use async_openai::config::{AzureConfig, Config, OpenAIConfig};
use async_openai::types::chat::{
    ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::tools::image::{ImageAnalyzer, ImageGenerator, ImageSize};
use crate::transport::{TransportFlavor, TransportSettings};

/// 图像相关模型（Azure 下为部署名）
#[derive(Debug, Clone)]
pub struct ImageModels {
    pub image_model: String,
    pub vision_model: String,
    pub analysis_max_tokens: u32,
}

impl Default for ImageModels {
    fn default() -> Self {
        Self {
            image_model: "dall-e-3".to_string(),
            vision_model: "gpt-4o".to_string(),
            analysis_max_tokens: 500,
        }
    }
}

enum VisionClient {
    OpenAi(Client<OpenAIConfig>),
    Azure(Client<AzureConfig>),
}

/// 同时实现 ImageGenerator 与 ImageAnalyzer
pub struct OpenAiImageClient {
    http: reqwest::Client,
    settings: TransportSettings,
    models: ImageModels,
    vision: VisionClient,
}

impl OpenAiImageClient {
    pub fn new(settings: TransportSettings, models: ImageModels) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| e.to_string())?;
        let vision = match settings.flavor {
            TransportFlavor::OpenAi => VisionClient::OpenAi(Client::with_config(
                OpenAIConfig::new()
                    .with_api_base(&settings.base_url)
                    .with_api_key(&settings.api_key),
            )),
            // AzureConfig 自己拼接 /openai/deployments/{id}
            TransportFlavor::Azure => VisionClient::Azure(Client::with_config(
                AzureConfig::new()
                    .with_api_base(settings.base_url.trim_end_matches("/openai"))
                    .with_api_key(&settings.api_key)
                    .with_deployment_id(&models.vision_model)
                    .with_api_version(&settings.api_version),
            )),
        };
        Ok(Self {
            http,
            settings,
            models,
            vision,
        })
    }

    fn images_request(&self) -> reqwest::RequestBuilder {
        match self.settings.flavor {
            TransportFlavor::OpenAi => self
                .http
                .post(format!("{}/images/generations", self.settings.base_url))
                .bearer_auth(&self.settings.api_key),
            TransportFlavor::Azure => self
                .http
                .post(format!(
                    "{}/deployments/{}/images/generations",
                    self.settings.base_url, self.models.image_model
                ))
                .header("api-key", &self.settings.api_key)
                .query(&[("api-version", self.settings.api_version.as_str())]),
        }
    }

    fn vision_request(&self, image_url: &str, prompt: &str) -> Result<CreateChatCompletionRequest, String> {
        let text = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(prompt)
            .build()
            .map_err(|e| e.to_string())?;
        let image = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(ImageUrlArgs::default().url(image_url).build().map_err(|e| e.to_string())?)
            .build()
            .map_err(|e| e.to_string())?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(vec![
                ChatCompletionRequestUserMessageContentPart::Text(text),
                ChatCompletionRequestUserMessageContentPart::ImageUrl(image),
            ])
            .build()
            .map_err(|e| e.to_string())?;
        CreateChatCompletionRequestArgs::default()
            .model(&self.models.vision_model)
            .messages(vec![user.into()])
            .max_completion_tokens(self.models.analysis_max_tokens)
            .build()
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

async fn complete<C: Config>(client: &Client<C>, request: CreateChatCompletionRequest) -> Result<String, String> {
    let response = client.chat().create(request).await.map_err(|e| e.to_string())?;
    response
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| "vision model returned no content".to_string())
}

#[async_trait]
impl ImageGenerator for OpenAiImageClient {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<String, String> {
        let body = json!({
            "model": self.models.image_model,
            "prompt": prompt,
            "size": size.as_str(),
            "n": 1,
        });
        let response = self
            .images_request()
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("image request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("image service returned {status}: {text}"));
        }
        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid image response: {e}"))?;
        let url = parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| "image response contained no URL".to_string())?;
        tracing::info!(model = %self.models.image_model, size = size.as_str(), "image generated");
        Ok(url)
    }
}

#[async_trait]
impl ImageAnalyzer for OpenAiImageClient {
    async fn analyze(&self, image_url: &str, prompt: &str) -> Result<String, String> {
        let request = self.vision_request(image_url, prompt)?;
        match &self.vision {
            VisionClient::OpenAi(client) => complete(client, request).await,
            VisionClient::Azure(client) => complete(client, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(flavor: TransportFlavor, base_url: &str) -> TransportSettings {
        TransportSettings {
            flavor,
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            api_version: "2024-05-01-preview".to_string(),
            model: "gpt-4o".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_images_url_per_flavor() {
        let openai = OpenAiImageClient::new(
            settings(TransportFlavor::OpenAi, "https://api.openai.com/v1"),
            ImageModels::default(),
        )
        .unwrap();
        let req = openai.images_request().build().unwrap();
        assert_eq!(req.url().as_str(), "https://api.openai.com/v1/images/generations");
        assert!(req.headers().get("authorization").is_some());

        let azure = OpenAiImageClient::new(
            settings(TransportFlavor::Azure, "https://res.openai.azure.com/openai"),
            ImageModels::default(),
        )
        .unwrap();
        let req = azure.images_request().build().unwrap();
        assert_eq!(
            req.url().as_str(),
            "https://res.openai.azure.com/openai/deployments/dall-e-3/images/generations?api-version=2024-05-01-preview"
        );
        assert_eq!(req.headers().get("api-key").unwrap(), "sk-test");
    }

    #[test]
    fn test_vision_request_shape() {
        let client = OpenAiImageClient::new(
            settings(TransportFlavor::OpenAi, "https://api.openai.com/v1"),
            ImageModels::default(),
        )
        .unwrap();
        let request = client
            .vision_request("https://img.test/cat.png", "What is this?")
            .unwrap();
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["max_completion_tokens"], 500);
        let parts = &value["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "What is this?");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://img.test/cat.png");
    }
}
