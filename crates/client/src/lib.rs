// chatfeed-client: resilient stream consumer and message rendering.

pub mod config;
pub mod feed;
pub mod render;
pub mod runtime;
pub mod stream;
