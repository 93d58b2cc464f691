pub mod config;
pub mod db;
pub mod error;
pub mod mailbox;
pub mod output;
pub mod store;

pub use config::OAuthConfig;
pub use error::{MailboxError, UserAction};
pub use mailbox::Mailbox;
pub use store::{IntegrationStore, SqliteIntegrationStore};
