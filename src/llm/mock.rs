//! Mock 图像能力（用于测试与演示，无需 API）
//!
//! 生成返回固定 URL，分析返回固定文本，并记录每次调用。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::tools::image::{ImageAnalyzer, ImageGenerator, ImageSize};

#[derive(Debug)]
pub struct MockImageProvider {
    url: String,
    analysis: String,
    failure: Option<String>,
    delay: Duration,
    generated: Mutex<Vec<(String, ImageSize)>>,
    analyzed: Mutex<Vec<(String, String)>>,
}

impl Default for MockImageProvider {
    fn default() -> Self {
        Self {
            url: "https://images.example.com/generated.png".to_string(),
            analysis: "A mock analysis of the image".to_string(),
            failure: None,
            delay: Duration::ZERO,
            generated: Mutex::new(Vec::new()),
            analyzed: Mutex::new(Vec::new()),
        }
    }
}

impl MockImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用都以 message 失败
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = analysis.into();
        self
    }

    /// 每次调用先等待 delay（模拟慢速服务）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    pub fn generated(&self) -> Vec<(String, ImageSize)> {
        self.generated.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn analyzed(&self) -> Vec<(String, String)> {
        self.analyzed.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ImageGenerator for MockImageProvider {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<String, String> {
        if let Ok(mut calls) = self.generated.lock() {
            calls.push((prompt.to_string(), size));
        }
        self.pause().await;
        match &self.failure {
            Some(message) => Err(message.clone()),
            None => Ok(self.url.clone()),
        }
    }
}

#[async_trait]
impl ImageAnalyzer for MockImageProvider {
    async fn analyze(&self, image_url: &str, prompt: &str) -> Result<String, String> {
        if let Ok(mut calls) = self.analyzed.lock() {
            calls.push((image_url.to_string(), prompt.to_string()));
        }
        self.pause().await;
        match &self.failure {
            Some(message) => Err(message.clone()),
            None => Ok(self.analysis.clone()),
        }
    }
}
