//! 默认 Agent 团队：user_proxy（主控）+ dalle_assistant（生成）+ vision_assistant（分析）

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{AgentDefinition, Orchestrator, OrchestratorBuilder, OrchestratorError, ToolSchema};
use crate::llm::OpenAiImageClient;
use crate::tools::{
    AnalyzeImageTool, GenerateImageTool, ImageAnalyzer, ImageGenerator, SendMessageTool,
};
use crate::transport::{AssistantTransport, HttpTransport};

pub const USER_PROXY: &str = "user_proxy";
pub const DALLE_ASSISTANT: &str = "dalle_assistant";
pub const VISION_ASSISTANT: &str = "vision_assistant";

pub const DEFAULT_QUERY: &str = "Create a beautiful landscape image of a sunset over mountains, then analyze it for quality and suggest improvements";

const USER_PROXY_INSTRUCTIONS: &str = "\
You are the User Proxy Assistant, the main orchestrator for a multi-agent system.
Your role is to coordinate between specialized agents to accomplish user tasks.

Available agents:
- dalle_assistant: Can generate images using DALL-E
- vision_assistant: Can analyze images using GPT-4 Vision

Process workflow:
1. Analyze the user's request
2. Determine which agents need to be involved
3. Send messages to appropriate agents using the send_message_to_agent function
4. Coordinate responses and iterate as needed
5. Provide final consolidated response to user

Optional Plan (for structured workflow):
1. dalle_assistant creates and sends the image to the user_proxy agent
2. vision_assistant analyzes images and sends feedback to the user_proxy agent
3. dalle_assistant creates improved image based on feedback
4. vision_assistant analyzes the improved image
5. dalle_assistant creates final optimized image

Always communicate clearly with the user about what each agent is doing.";

const DALLE_INSTRUCTIONS: &str = "\
You are the DALL-E Assistant, specialized in image generation.
Your primary function is to create images based on text descriptions using DALL-E.

When you receive a request:
1. Analyze the description carefully
2. Use the generate_image function to create the image
3. Provide the image URL and a description of what was created
4. If feedback is provided, use it to improve subsequent generations

Focus on creating high-quality, detailed images that match the user's requirements.";

const VISION_INSTRUCTIONS: &str = "\
You are the Vision Assistant, specialized in image analysis using GPT-4 Vision.
Your primary function is to analyze images and provide detailed feedback.

When you receive an image analysis request:
1. Carefully examine the provided image
2. Use the analyze_image function to get detailed analysis
3. Provide comprehensive feedback including:
   - What you see in the image
   - Quality assessment
   - Suggestions for improvement
   - Alignment with original requirements

Focus on providing constructive, detailed analysis that can help improve future iterations.";

/// 默认团队的构建器：定义、工具与能力提供者已装配，运行参数可继续调整
pub fn default_builder(
    transport: Arc<dyn AssistantTransport>,
    generator: Arc<dyn ImageGenerator>,
    analyzer: Arc<dyn ImageAnalyzer>,
) -> OrchestratorBuilder {
    let send = SendMessageTool::new([DALLE_ASSISTANT, VISION_ASSISTANT]);
    let generate = GenerateImageTool::new(generator);
    let analyze = AnalyzeImageTool::new(analyzer);

    let user_proxy =
        AgentDefinition::new(USER_PROXY, USER_PROXY_INSTRUCTIONS).with_tool(ToolSchema::of(&send));
    let dalle =
        AgentDefinition::new(DALLE_ASSISTANT, DALLE_INSTRUCTIONS).with_tool(ToolSchema::of(&generate));
    let vision =
        AgentDefinition::new(VISION_ASSISTANT, VISION_INSTRUCTIONS).with_tool(ToolSchema::of(&analyze));

    Orchestrator::builder(transport)
        .primary(user_proxy)
        .peer(dalle)
        .peer(vision)
        .tool(send)
        .tool(generate)
        .tool(analyze)
}

/// 按配置连接真实服务并创建默认团队
pub async fn build_default(config: &AppConfig) -> Result<Orchestrator, OrchestratorError> {
    let settings = config.transport.resolve()?;
    let transport = Arc::new(HttpTransport::new(settings.clone())?);
    let images = Arc::new(
        OpenAiImageClient::new(settings, config.tools.image_models())
            .map_err(OrchestratorError::Configuration)?,
    );

    default_builder(transport, images.clone(), images)
        .settings(config.run.settings()?)
        .tool_timeout(config.tools.timeout())
        .build()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockImageProvider;
    use crate::tools::SEND_MESSAGE_TOOL;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn test_default_team_shape() {
        let transport = Arc::new(MockTransport::new());
        let images = Arc::new(MockImageProvider::new());
        let orchestrator = default_builder(transport.clone(), images.clone(), images)
            .build()
            .await
            .unwrap();

        assert_eq!(orchestrator.primary(), USER_PROXY);
        assert_eq!(
            orchestrator.agents().names(),
            vec![USER_PROXY.to_string(), DALLE_ASSISTANT.to_string(), VISION_ASSISTANT.to_string()]
        );
        let proxy = orchestrator.agents().lookup(USER_PROXY).unwrap();
        assert_eq!(proxy.definition.tool_names(), vec![SEND_MESSAGE_TOOL]);
        assert_eq!(
            proxy.definition.tools[0].parameters["properties"]["agent_name"]["enum"],
            serde_json::json!([DALLE_ASSISTANT, VISION_ASSISTANT])
        );
        assert_eq!(transport.live_agents().len(), 3);
    }
}
