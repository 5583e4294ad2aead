//! recruiter-rm: answers recruiter emails with a courtesy decline.

pub mod config;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod mail;
pub mod reply;
pub mod responder;

pub use error::{Error, Result};
