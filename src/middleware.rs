//! # 处理函数与中间件
//!
//! 处理函数是任意 `Fn(Context) -> impl Future<Output = Response>`，在引擎内部统一
//! 以 [`BoxedHandler`] 保存。中间件是“处理函数到处理函数”的变换，
//! [`create_stack`] 按注册顺序组合，第一个中间件位于最外层。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;

use crate::{context::Context, response::Response};

/// 请求 ID 在上下文中的键
pub const REQUEST_ID_KEY: &str = "request_id";
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture<Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<Response> {
        Box::pin(self(ctx))
    }
}

pub type BoxedHandler = Arc<dyn Handler>;

pub type Middleware = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>;

pub fn boxed<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

/// 组合多个中间件，`middleware[0]` 最先看到请求、最后看到响应。
pub fn create_stack(middleware: &[Middleware]) -> impl Fn(BoxedHandler) -> BoxedHandler + '_ {
    move |handler| {
        middleware
            .iter()
            .rev()
            .fold(handler, |next, layer| layer(next))
    }
}

/// 以 `async fn(ctx, next)` 的形式编写中间件。
///
/// ```ignore
/// let logging = from_fn(|ctx, next| async move {
///     let path = ctx.request().path().to_string();
///     let response = next.call(ctx).await;
///     log::info!("{} -> {}", path, response.status_code());
///     response
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Context, BoxedHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: BoxedHandler| {
        let f = Arc::clone(&f);
        boxed(move |ctx: Context| f(ctx, Arc::clone(&next)))
    })
}

/// 超时中间件：内部处理在 `duration` 内未完成时返回 `504 Request timed out`。
///
/// 超时后内部 future 被直接丢弃，处理函数在下一个 `.await` 处停止执行。
pub fn timeout(duration: Duration) -> Middleware {
    from_fn(move |ctx, next| async move {
        let id = ctx.id();
        match tokio::time::timeout(duration, next.call(ctx)).await {
            Ok(response) => response,
            Err(_) => {
                debug!("[ID{}]请求处理超时（{:?}）", id, duration);
                Response::error(504, "Request timed out")
            }
        }
    })
}

/// 请求 ID 中间件：沿用 `X-Request-ID` 请求头，缺失时取当前 UNIX 纳秒时间戳。
/// ID 写入上下文值 `request_id`，并在响应头中回显。
pub fn request_id() -> Middleware {
    from_fn(|mut ctx, next| async move {
        let request_id = match ctx.request().header(REQUEST_ID_HEADER) {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => unix_nanos().to_string(),
        };
        ctx.set_value(REQUEST_ID_KEY, &request_id);
        let mut response = next.call(ctx).await;
        response.set_header(REQUEST_ID_HEADER, &request_id);
        response
    })
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
