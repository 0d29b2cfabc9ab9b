pub mod chat;
pub mod connector;
pub mod credential;
pub mod slack_events;
