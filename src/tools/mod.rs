pub mod image;
pub mod registry;
pub mod router;
pub mod schema;
pub mod send;

pub use image::{
    AnalyzeImageTool, GenerateImageTool, ImageAnalyzer, ImageGenerator, ImageSize,
    ANALYZE_IMAGE_TOOL, GENERATE_IMAGE_TOOL,
};
pub use registry::{PeerDispatch, Tool, ToolContext, ToolRegistry};
pub use router::ToolRouter;
pub use schema::parameters_schema_for;
pub use send::{SendMessageTool, SEND_MESSAGE_TOOL};
