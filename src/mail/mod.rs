//! Mailbox access: message types, the gateway trait and its IMAP/SMTP
//! implementation.

pub mod gateway;
pub mod imap;
pub mod message;
pub mod smtp;

pub use gateway::{ImapSmtpGateway, MailGateway, filter_candidates};
pub use message::{InboundMessage, OutboundMessage};
