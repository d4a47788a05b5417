// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 引擎
//!
//! `Engine` 汇总路由表、中间件、路由分组、静态目录挂载以及 HTML 渲染器。
//! 注册阶段通过 `&mut Engine` 完成；开始服务后引擎被放入 `Arc` 中只读共享，
//! 每个请求的 [`Context`] 都持有它的一份引用。
//!
//! 请求分发时的处理链（由外到内）：
//!
//! 1. 引擎级中间件（按注册顺序）；
//! 2. 超时中间件（`timeout_secs` 为 0 时不启用）；
//! 3. 命中路由所属分组的中间件；
//! 4. 路由处理函数，或 404 / 405 兜底处理。

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};

use crate::{
    cache::FileCache,
    config::Config,
    context::Context,
    exception::Exception,
    middleware::{boxed, create_stack, timeout, BoxedHandler, Handler, Middleware},
    param::{HttpRequestMethod, HTML_INDEX},
    render::Render,
    request::Request,
    response::Response,
    router::{Pattern, RouteMatch, Router},
};

struct RouteEntry {
    handler: BoxedHandler,
    group: Option<usize>,
}

struct GroupEntry {
    prefix: String,
    middleware: Vec<Middleware>,
}

pub struct Engine {
    config: Config,
    router: Router<RouteEntry>,
    middleware: Vec<Middleware>,
    groups: Vec<GroupEntry>,
    render: Option<Render>,
    file_cache: Arc<Mutex<FileCache>>,
    pub(crate) active_connections: Arc<Mutex<u32>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(Config::new())
    }

    pub fn with_config(config: Config) -> Self {
        let file_cache = Arc::new(Mutex::new(FileCache::from_capacity(config.cache_size())));
        Self {
            config,
            router: Router::new(),
            middleware: Vec::new(),
            groups: Vec::new(),
            render: None,
            file_cache,
            active_connections: Arc::new(Mutex::new(0)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_render(&mut self, render: Render) -> &mut Self {
        self.render = Some(render);
        self
    }

    pub fn render(&self) -> Option<&Render> {
        self.render.as_ref()
    }

    pub fn file_cache(&self) -> &Arc<Mutex<FileCache>> {
        &self.file_cache
    }

    /// 当前活跃连接数的共享计数器，可在服务启动前取出供运维控制台查询
    pub fn connection_counter(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.active_connections)
    }

    /// 根据配置中的 `local` 与 `port` 计算监听地址
    pub fn address(&self) -> SocketAddrV4 {
        let ip = match self.config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        SocketAddrV4::new(ip, self.config.port())
    }

    pub fn route_count(&self) -> usize {
        self.router.len()
    }

    /// 注册引擎级中间件，先注册的位于外层
    pub fn use_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    pub fn handle<H: Handler>(
        &mut self,
        method: HttpRequestMethod,
        pattern: &str,
        handler: H,
    ) -> &mut Self {
        self.add_route(method, pattern, boxed(handler), None);
        self
    }

    pub fn get<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Get, pattern, handler)
    }

    pub fn post<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Post, pattern, handler)
    }

    pub fn put<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Put, pattern, handler)
    }

    pub fn patch<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Patch, pattern, handler)
    }

    pub fn delete<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Delete, pattern, handler)
    }

    // 非法的路由模式只记录错误，不中断注册流程
    fn add_route(
        &mut self,
        method: HttpRequestMethod,
        pattern: &str,
        handler: BoxedHandler,
        group: Option<usize>,
    ) {
        let result = Pattern::parse(pattern)
            .and_then(|parsed| self.router.add(method, parsed, RouteEntry { handler, group }));
        match result {
            Ok(()) => debug!("注册路由：{} {}", method, pattern),
            Err(e) => error!("路由 {} {} 注册失败：{}", method, pattern, e),
        }
    }

    /// 获取前缀为 `prefix` 的路由分组，同一前缀总是返回同一个分组
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        let prefix = normalize_group_prefix(prefix);
        let index = match self.groups.iter().position(|g| g.prefix == prefix) {
            Some(index) => index,
            None => {
                debug!("创建路由分组：{}", prefix);
                self.groups.push(GroupEntry {
                    prefix,
                    middleware: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        Group {
            engine: self,
            index,
        }
    }

    /// 将目录 `dir` 挂载到 URL 前缀 `url_path` 下。
    ///
    /// `url_path` 会被规范化为 `/x/` 的形式。目录不存在时记录错误、为该前缀注册
    /// 404 处理并返回 [`Exception::StaticDirNotFound`]。
    pub fn static_files<P: AsRef<Path>>(&mut self, url_path: &str, dir: P) -> Result<(), Exception> {
        let mount = normalize_mount_path(url_path);
        let dir = dir.as_ref().to_path_buf();

        if !dir.is_dir() {
            error!("静态目录不存在：{} -> {}", mount, dir.display());
            self.get(&mount, |_ctx: Context| async { Response::not_found() });
            return Err(Exception::StaticDirNotFound(dir));
        }

        let root = Arc::new(dir);
        let prefix = Arc::new(mount.clone());
        let handler = move |ctx: Context| {
            let root = Arc::clone(&root);
            let prefix = Arc::clone(&prefix);
            async move { serve_static(&ctx, &prefix, &root) }
        };
        self.get(&mount, handler);
        info!("静态文件目录已挂载：{}", mount);
        Ok(())
    }

    /// 把一个已解析的请求交给匹配的处理链，返回最终响应。
    pub async fn dispatch(self: Arc<Self>, request: Request, id: u128) -> Response {
        let method = request.method();
        let path = request.path().to_string();
        let mut ctx = Context::new(request, Arc::clone(&self), id);

        let terminal: BoxedHandler = match self.router.find(method, &path) {
            RouteMatch::Found(route, params) => {
                debug!("[ID{}]命中路由：{} {}", id, route.method, route.pattern.as_str());
                ctx.set_params(params);
                let handler = Arc::clone(&route.value.handler);
                match route.value.group.and_then(|i| self.groups.get(i)) {
                    Some(group) => create_stack(&group.middleware)(handler),
                    None => handler,
                }
            }
            RouteMatch::MethodNotAllowed(allowed) => {
                warn!("[ID{}]路径 {} 不支持 {} 方法，返回405", id, path, method);
                boxed(move |_ctx: Context| {
                    let allowed = allowed.clone();
                    async move { Response::method_not_allowed(allowed) }
                })
            }
            RouteMatch::NotFound => {
                warn!("[ID{}]请求的路径：{} 不存在，返回404", id, path);
                boxed(|_ctx: Context| async { Response::not_found() })
            }
        };

        let handler = match self.config.timeout() {
            Some(duration) => timeout(duration)(terminal),
            None => terminal,
        };
        let handler = create_stack(&self.middleware)(handler);

        let mut response = handler.call(ctx).await;
        if method == HttpRequestMethod::Head {
            response.set_head_only();
        }
        response
    }
}

/// 路由分组：共享前缀与一组只作用于分组内路由的中间件
pub struct Group<'a> {
    engine: &'a mut Engine,
    index: usize,
}

impl Group<'_> {
    pub fn prefix(&self) -> &str {
        &self.engine.groups[self.index].prefix
    }

    pub fn use_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.engine.groups[self.index].middleware.push(middleware);
        self
    }

    pub fn handle<H: Handler>(
        &mut self,
        method: HttpRequestMethod,
        path: &str,
        handler: H,
    ) -> &mut Self {
        let pattern = format!("{}{}", self.prefix(), path);
        self.engine
            .add_route(method, &pattern, boxed(handler), Some(self.index));
        self
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Get, path, handler)
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Post, path, handler)
    }

    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Put, path, handler)
    }

    pub fn patch<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Patch, path, handler)
    }

    pub fn delete<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(HttpRequestMethod::Delete, path, handler)
    }
}

// "api" / "/api/" → "/api"
fn normalize_group_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

// "assets" / "/assets" → "/assets/"
fn normalize_mount_path(path: &str) -> String {
    let mut mount = path.to_string();
    if !mount.starts_with('/') {
        mount.insert(0, '/');
    }
    if !mount.ends_with('/') {
        mount.push('/');
    }
    mount
}

/// 把请求路径中挂载点之后的部分映射到 `root` 下的文件，拒绝任何越出 `root` 的路径。
fn resolve_static_path(root: &Path, relative: &str) -> Result<PathBuf, Exception> {
    let mut resolved = root.to_path_buf();
    for part in relative.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part.contains('\\') || part.contains('\0') {
            return Err(Exception::InvalidPath);
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => resolved.push(name),
            _ => return Err(Exception::InvalidPath),
        }
    }
    Ok(resolved)
}

fn serve_static(ctx: &Context, prefix: &str, root: &Path) -> Response {
    let id = ctx.id();
    let relative = ctx.request().path().strip_prefix(prefix).unwrap_or_default();

    let mut path = match resolve_static_path(root, relative) {
        Ok(path) => path,
        Err(e) => {
            warn!("[ID{}]请求的路径：{} 包含非法字符，返回400", id, ctx.request().path());
            return Response::from_exception(&e);
        }
    };
    if path.is_dir() {
        path.push(HTML_INDEX);
    }
    if !path.is_file() {
        debug!("[ID{}]静态文件不存在：{}", id, path.display());
        return Response::not_found();
    }

    match Response::from_file(&path, ctx.engine().file_cache(), id) {
        Ok(response) => response,
        Err(Exception::FileNotFound) => Response::not_found(),
        Err(e) => {
            error!("[ID{}]读取静态文件 {} 失败：{}", id, path.display(), e);
            Response::from_exception(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;
    use std::fs;
    use std::time::Duration;

    fn request(method: &str, target: &str) -> Request {
        let raw = format!("{} {} HTTP/1.1\r\nHost: localhost\r\n\r\n", method, target);
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    async fn send(engine: &Arc<Engine>, method: &str, target: &str) -> Response {
        Arc::clone(engine).dispatch(request(method, target), 0).await
    }

    fn tag(name: &'static str) -> Middleware {
        from_fn(move |mut ctx, next| async move {
            let trail = format!("{}{}>", ctx.value("trail").unwrap_or_default(), name);
            ctx.set_value("trail", &trail);
            next.call(ctx).await
        })
    }

    async fn trail(ctx: Context) -> Response {
        ctx.text(200, ctx.value("trail").unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn test_basic_routing() {
        let mut engine = Engine::new();
        engine
            .get("/", |ctx: Context| async move { ctx.text(200, "home") })
            .post("/items", |ctx: Context| async move { ctx.text(201, "created") })
            .get("/users/{id}", |ctx: Context| async move {
                let id = ctx.param("id").unwrap_or_default().to_string();
                ctx.text(200, id)
            });
        let engine = Arc::new(engine);

        assert_eq!(send(&engine, "GET", "/").await.body_string(), "home");
        assert_eq!(send(&engine, "POST", "/items").await.status_code(), 201);
        assert_eq!(send(&engine, "GET", "/users/42").await.body_string(), "42");
    }

    #[tokio::test]
    async fn test_not_found_and_method_not_allowed() {
        let mut engine = Engine::new();
        engine.get("/only-get", |ctx: Context| async move { ctx.text(200, "ok") });
        let engine = Arc::new(engine);

        let missing = send(&engine, "GET", "/nope").await;
        assert_eq!(missing.status_code(), 404);
        assert_eq!(missing.body_string(), "404 page not found\n");

        let wrong = send(&engine, "DELETE", "/only-get").await;
        assert_eq!(wrong.status_code(), 405);
        assert_eq!(
            wrong.allow().unwrap(),
            &[HttpRequestMethod::Get, HttpRequestMethod::Head]
        );
    }

    #[tokio::test]
    async fn test_invalid_routes_skipped() {
        let mut engine = Engine::new();
        engine
            .get("/users/{}", |ctx: Context| async move { ctx.text(200, "empty") })
            .get("/files/{...}", |ctx: Context| async move { ctx.text(200, "rest") })
            .get("/items/{id}", |ctx: Context| async move { ctx.text(200, "id") })
            .get("/items/{name}", |ctx: Context| async move { ctx.text(200, "name") });
        assert_eq!(engine.route_count(), 1);
        let engine = Arc::new(engine);

        assert_eq!(send(&engine, "GET", "/users/1").await.status_code(), 404);
        assert_eq!(send(&engine, "GET", "/items/7").await.body_string(), "id");
    }

    #[tokio::test]
    async fn test_head_strips_body() {
        let mut engine = Engine::new();
        engine.get("/page", |ctx: Context| async move { ctx.text(200, "body") });
        let engine = Arc::new(engine);

        let response = send(&engine, "HEAD", "/page").await;
        assert_eq!(response.status_code(), 200);
        let raw = String::from_utf8(response.as_bytes()).unwrap();
        assert!(raw.contains("Content-Length: 4"));
        assert!(!raw.ends_with("body"));
    }

    #[tokio::test]
    async fn test_middleware_order() {
        let mut engine = Engine::new();
        engine.use_middleware(tag("e1")).use_middleware(tag("e2"));
        engine.get("/plain", trail);
        engine
            .group("/api")
            .use_middleware(tag("g1"))
            .use_middleware(tag("g2"))
            .get("/trail", trail);
        let engine = Arc::new(engine);

        assert_eq!(send(&engine, "GET", "/api/trail").await.body_string(), "e1>e2>g1>g2>");
        assert_eq!(send(&engine, "GET", "/plain").await.body_string(), "e1>e2>");
    }

    #[tokio::test]
    async fn test_engine_middleware_wraps_not_found() {
        let mut engine = Engine::new();
        engine.use_middleware(crate::middleware::request_id());
        let engine = Arc::new(engine);

        let response = send(&engine, "GET", "/missing").await;
        assert_eq!(response.status_code(), 404);
        assert!(response.header("X-Request-ID").is_some());
    }

    #[tokio::test]
    async fn test_group_same_prefix_shared() {
        let mut engine = Engine::new();
        engine.group("api").use_middleware(tag("g"));
        engine.group("/api/").get("/x", trail);
        assert_eq!(engine.groups.len(), 1);
        let engine = Arc::new(engine);
        assert_eq!(send(&engine, "GET", "/api/x").await.body_string(), "g>");
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut config = Config::new();
        config.set_timeout_secs(1);
        let mut engine = Engine::with_config(config);
        engine.get("/slow", |ctx: Context| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ctx.text(200, "late")
        });
        let engine = Arc::new(engine);

        let response = send(&engine, "GET", "/slow").await;
        assert_eq!(response.status_code(), 504);
        assert_eq!(response.body_string(), "Request timed out\n");
    }

    #[tokio::test]
    async fn test_static_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("site.css"), "body{}").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs").join("index.html"), "<h1>docs</h1>").unwrap();

        let mut engine = Engine::new();
        engine.static_files("assets", dir.path()).unwrap();
        let engine = Arc::new(engine);

        let css = send(&engine, "GET", "/assets/site.css").await;
        assert_eq!(css.status_code(), 200);
        assert_eq!(css.content_type(), Some("text/css; charset=utf-8"));
        assert_eq!(css.body_string(), "body{}");

        let index = send(&engine, "GET", "/assets/docs/").await;
        assert_eq!(index.body_string(), "<h1>docs</h1>");

        assert_eq!(send(&engine, "GET", "/assets/missing.js").await.status_code(), 404);
        assert_eq!(send(&engine, "GET", "/assets/../secret").await.status_code(), 400);
    }

    #[tokio::test]
    async fn test_static_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new();
        let result = engine.static_files("/files/", dir.path().join("missing"));
        assert!(matches!(result, Err(Exception::StaticDirNotFound(_))));
        let engine = Arc::new(engine);
        assert_eq!(send(&engine, "GET", "/files/a.txt").await.status_code(), 404);
    }

    #[test]
    fn test_normalize_paths() {
        assert_eq!(normalize_mount_path("assets"), "/assets/");
        assert_eq!(normalize_mount_path("/assets/"), "/assets/");
        assert_eq!(normalize_group_prefix("api/"), "/api");
        assert_eq!(normalize_group_prefix("/"), "");
    }

    #[test]
    fn test_resolve_static_path() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_static_path(root, "css/site.css").unwrap(),
            PathBuf::from("/srv/www/css/site.css")
        );
        assert_eq!(resolve_static_path(root, "").unwrap(), PathBuf::from("/srv/www"));
        assert!(resolve_static_path(root, "a/../../etc/passwd").is_err());
        assert!(resolve_static_path(root, "..\\windows").is_err());
    }

    #[test]
    fn test_address() {
        let engine = Engine::new();
        assert_eq!(engine.address().to_string(), "127.0.0.1:7878");
    }
}
