pub mod chat;
pub mod connectors;
pub mod credentials;
pub mod dispatch;
pub mod reply;

pub use chat::ChatService;
pub use connectors::ConnectorService;
pub use credentials::CredentialService;
pub use dispatch::Dispatcher;
pub use reply::{EchoReplyGenerator, ReplyGenerator};
