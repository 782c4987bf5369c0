//! 图像工具：generate_image / analyze_image
//!
//! 工具层只做参数解析与结果格式化，真正的能力由 ImageGenerator / ImageAnalyzer 提供（见 llm 模块）。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::schema::parameters_schema_for;
use crate::tools::{Tool, ToolContext};

pub const GENERATE_IMAGE_TOOL: &str = "generate_image";
pub const ANALYZE_IMAGE_TOOL: &str = "analyze_image";
pub const DEFAULT_ANALYSIS_PROMPT: &str = "Provide a detailed analysis of this image";

/// 生成图像尺寸
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1792x1024")]
    Landscape,
    #[serde(rename = "1024x1792")]
    Portrait,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Landscape => "1792x1024",
            ImageSize::Portrait => "1024x1792",
        }
    }
}

/// 文生图能力，返回图片 URL
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<String, String>;
}

/// 看图能力，返回分析文本
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(&self, image_url: &str, prompt: &str) -> Result<String, String>;
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GenerateImageArgs {
    /// Detailed text description of the image to generate
    prompt: String,
    /// Size of the generated image
    #[serde(default)]
    size: ImageSize,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AnalyzeImageArgs {
    /// URL of the image to analyze
    image_url: String,
    /// Specific aspects to analyze in the image
    #[serde(default)]
    analysis_prompt: Option<String>,
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))
}

pub struct GenerateImageTool {
    generator: Arc<dyn ImageGenerator>,
}

impl GenerateImageTool {
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        GENERATE_IMAGE_TOOL
    }

    fn description(&self) -> &str {
        "Generate an image using DALL-E based on a text prompt"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<GenerateImageArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let args: GenerateImageArgs = parse_args(args)?;
        if args.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_string());
        }
        let url = self
            .generator
            .generate(&args.prompt, args.size)
            .await
            .map_err(|e| format!("Error generating image: {e}"))?;
        Ok(format!("Image generated successfully! URL: {url}"))
    }
}

pub struct AnalyzeImageTool {
    analyzer: Arc<dyn ImageAnalyzer>,
}

impl AnalyzeImageTool {
    pub fn new(analyzer: Arc<dyn ImageAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Tool for AnalyzeImageTool {
    fn name(&self) -> &str {
        ANALYZE_IMAGE_TOOL
    }

    fn description(&self) -> &str {
        "Analyze an image using a vision model"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<AnalyzeImageArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let args: AnalyzeImageArgs = parse_args(args)?;
        if args.image_url.trim().is_empty() {
            return Err("image_url must not be empty".to_string());
        }
        let prompt = args
            .analysis_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_ANALYSIS_PROMPT);
        let analysis = self
            .analyzer
            .analyze(&args.image_url, prompt)
            .await
            .map_err(|e| format!("Error analyzing image: {e}"))?;
        Ok(format!("Image analysis: {analysis}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockImageProvider;
    use serde_json::json;

    #[test]
    fn test_size_wire_names() {
        assert_eq!(serde_json::to_value(ImageSize::Landscape).unwrap(), json!("1792x1024"));
        let size: ImageSize = serde_json::from_value(json!("1024x1792")).unwrap();
        assert_eq!(size, ImageSize::Portrait);
        assert_eq!(ImageSize::default().as_str(), "1024x1024");
    }

    #[test]
    fn test_generate_schema() {
        let schema = GenerateImageTool::new(Arc::new(MockImageProvider::new())).parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["prompt"]));
        assert!(schema["properties"]["size"].to_string().contains("1792x1024"));
    }

    #[tokio::test]
    async fn test_generate_formats_url() {
        let provider = Arc::new(MockImageProvider::new().with_url("https://img.test/cat.png"));
        let tool = GenerateImageTool::new(provider.clone());
        let out = tool
            .execute(json!({"prompt": "a cat"}), &ToolContext::detached("dalle_assistant"))
            .await;
        assert_eq!(out, Ok("Image generated successfully! URL: https://img.test/cat.png".to_string()));
        assert_eq!(provider.generated(), vec![("a cat".to_string(), ImageSize::Square)]);
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_size() {
        let tool = GenerateImageTool::new(Arc::new(MockImageProvider::new()));
        let out = tool
            .execute(json!({"prompt": "a cat", "size": "10x10"}), &ToolContext::detached("d"))
            .await;
        assert!(out.unwrap_err().starts_with("invalid arguments"));
    }

    #[tokio::test]
    async fn test_analyze_uses_default_prompt() {
        let provider = Arc::new(MockImageProvider::new().with_analysis("a tabby cat"));
        let tool = AnalyzeImageTool::new(provider.clone());
        let out = tool
            .execute(json!({"image_url": "https://img.test/cat.png"}), &ToolContext::detached("v"))
            .await;
        assert_eq!(out, Ok("Image analysis: a tabby cat".to_string()));
        assert_eq!(
            provider.analyzed(),
            vec![("https://img.test/cat.png".to_string(), DEFAULT_ANALYSIS_PROMPT.to_string())]
        );
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let tool = AnalyzeImageTool::new(Arc::new(MockImageProvider::failing("quota exceeded")));
        let out = tool
            .execute(json!({"image_url": "https://img.test/x.png"}), &ToolContext::detached("v"))
            .await;
        assert_eq!(out, Err("Error analyzing image: quota exceeded".to_string()));
    }
}
