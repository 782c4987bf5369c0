//! 传输层：远端 Assistants 能力提供方的抽象与实现（HTTP / Mock），以及幂等读操作的重试策略

pub mod http;
pub mod mock;
pub mod retry;
pub mod traits;

pub use http::{HttpTransport, TransportFlavor, TransportSettings};
pub use mock::{MockTransport, Reply, ScriptStep};
pub use retry::{retry_idempotent, RetryConfig};
pub use traits::{AssistantTransport, TransportError};
