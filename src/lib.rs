pub mod binding;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod exception;
pub mod logger;
pub mod middleware;
pub mod pages;
pub mod param;
pub mod render;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod template;

pub use cache::FileCache;
pub use config::Config;
pub use context::Context;
pub use engine::{Engine, Group};
pub use exception::Exception;
pub use middleware::{create_stack, from_fn, BoxedHandler, Handler, Middleware};
pub use pages::{Page, Pages};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use render::{Data, Render, TemplateData};
pub use request::Request;
pub use response::Response;
pub use template::{CompiledTemplate, FileRole, TemplateCache};
