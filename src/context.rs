//! # 请求上下文
//!
//! 每个请求对应一个 `Context`，持有解析后的请求、所属引擎、路由参数以及
//! 中间件写入的键值。处理函数通过 `json` / `html` / `text` 生成响应。

use std::collections::HashMap;
use std::sync::Arc;

use log::error;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    binding,
    engine::Engine,
    exception::Exception,
    pages::Pages,
    render::TemplateData,
    request::Request,
    response::Response,
};

pub struct Context {
    request: Request,
    engine: Arc<Engine>,
    params: HashMap<String, String>,
    values: HashMap<String, String>,
    id: u128,
}

impl Context {
    pub fn new(request: Request, engine: Arc<Engine>, id: u128) -> Self {
        Self {
            request,
            engine,
            params: HashMap::new(),
            values: HashMap::new(),
            id,
        }
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    /// 路由参数，如 `/users/{id}` 中的 `id`
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query(key)
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.request.form_value(key)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set_value(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// 序列化为 JSON 响应，失败时返回 500
    pub fn json<T: Serialize + ?Sized>(&self, code: u16, data: &T) -> Response {
        match serde_json::to_vec(data) {
            Ok(body) => Response::json_bytes(code, body),
            Err(e) => {
                let e = Exception::Serialize(e.to_string());
                error!("[ID{}]{}", self.id, e);
                Response::error(500, &e.to_string())
            }
        }
    }

    /// 渲染模板为 HTML 响应，任何渲染错误都转为 500
    pub fn html(&self, code: u16, name: &str, data: Option<&TemplateData>) -> Response {
        match self.render_html(name, data) {
            Ok(body) => Response::html(code, body),
            Err(e) => {
                error!("[ID{}]渲染模板 {} 失败：{}", self.id, name, e);
                Response::error(500, &e.to_string())
            }
        }
    }

    fn render_html(&self, name: &str, data: Option<&TemplateData>) -> Result<Vec<u8>, Exception> {
        let render = self.engine.render().ok_or(Exception::RendererMissing)?;
        let mut buffer = Vec::new();
        render.template(&mut buffer, name, data)?;
        Ok(buffer)
    }

    pub fn text(&self, code: u16, body: impl Into<String>) -> Response {
        Response::text(code, body)
    }

    pub fn bind_json<T: DeserializeOwned>(&self) -> Result<T, Exception> {
        binding::bind_json(&self.request)
    }

    pub fn bind_form<T: DeserializeOwned>(&self) -> Result<T, Exception> {
        binding::bind_form(&self.request)
    }

    /// 以 `defaults` 为基础，合并本次请求中的 `limit` 与 `page` 参数
    pub fn pages(&self, defaults: Pages) -> Pages {
        let mut pages = defaults;
        pages.pagination_params(&self.request);
        pages
    }
}
