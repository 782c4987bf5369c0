//! 能力提供层：图像生成与图像分析的实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;

pub use mock::MockImageProvider;
pub use openai::{ImageModels, OpenAiImageClient};
