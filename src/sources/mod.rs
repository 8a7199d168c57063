//! Configuration sources.
//!
//! A source supplies complete configuration values: once at bootstrap through
//! [`Source::load`], then as a change feed through [`Source::watch`].

mod channel;
mod env;
mod file;
mod source;

pub use channel::{ChannelFeed, ChannelSource};
pub use env::EnvSource;
pub use file::FileSource;
pub use source::{Source, SourceStream};
