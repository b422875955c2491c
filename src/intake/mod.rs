//! Mail intake — fetching, dedup, and queueing of inbound messages.

pub mod mailbox;
pub mod message;
pub mod queue;

pub use mailbox::{ImapMailbox, Mailbox, MailboxConfig, spawn_mail_poller};
pub use message::EmailMessage;
pub use queue::DedupQueue;
