//! 路由模式解析与匹配。
//!
//! 支持的模式语法：
//!
//! - 字面量片段：`/users/list`
//! - 单片段通配：`/users/{id}`
//! - 剩余路径通配：`/files/{path...}`，必须是最后一个片段
//! - 以 `/` 结尾表示整棵子树：`/assets/` 匹配 `/assets/` 下的任何路径，`/` 匹配一切
//!
//! 精确模式交给 `matchit` 匹配（字面量优先于参数，参数优先于剩余通配）。
//! 没有精确模式可用时，再从长到短尝试请求路径的各级目录，匹配子树模式。
//! 同一模式下按方法区分处理函数，路径命中但方法不符时给出 `Allow` 列表。

use std::collections::HashMap;

use log::debug;

use crate::{exception::Exception, param::HttpRequestMethod};

#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    // matchit 语法的路径
    route: String,
    subtree: bool,
    rest: Option<String>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, Exception> {
        let invalid = |reason: &str| Exception::InvalidRoute {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let body = raw.strip_prefix('/').ok_or_else(|| invalid("must start with '/'"))?;
        let subtree = body.is_empty() || body.ends_with('/');
        let trimmed = body.trim_end_matches('/');

        let mut route = String::from("/");
        let mut rest = None;
        if !trimmed.is_empty() {
            let parts: Vec<&str> = trimmed.split('/').collect();
            let mut converted = Vec::with_capacity(parts.len());
            for (i, part) in parts.iter().enumerate() {
                let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    Some(name) => match name.strip_suffix("...") {
                        Some(name) => {
                            if i + 1 != parts.len() || subtree {
                                return Err(invalid("{name...} must be the last segment"));
                            }
                            check_name(name).map_err(|reason| invalid(reason))?;
                            rest = Some(name.to_string());
                            format!("{{*{}}}", name)
                        }
                        None => {
                            check_name(name).map_err(|reason| invalid(reason))?;
                            format!("{{{}}}", name)
                        }
                    },
                    None if part.contains(['{', '}']) => {
                        return Err(invalid("unbalanced braces in literal segment"))
                    }
                    None => part.to_string(),
                };
                converted.push(segment);
            }
            route.push_str(&converted.join("/"));
            if subtree {
                route.push('/');
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            route,
            subtree,
            rest,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_subtree(&self) -> bool {
        self.subtree
    }

    /// 子树模式去掉末尾 `/` 后的前缀，如 `/assets/` → `/assets`
    pub fn prefix(&self) -> &str {
        self.raw.trim_end_matches('/')
    }

    fn same_as(&self, other: &Pattern) -> bool {
        self.subtree == other.subtree && self.route == other.route
    }
}

fn check_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty parameter name");
    }
    if name.contains(['{', '}', '*', '.']) {
        return Err("invalid character in parameter name");
    }
    Ok(())
}

/// 路由表中的一项，`T` 为处理函数等附加数据
pub struct Route<T> {
    pub method: HttpRequestMethod,
    pub pattern: Pattern,
    pub value: T,
}

pub enum RouteMatch<'a, T> {
    Found(&'a Route<T>, HashMap<String, String>),
    /// 路径匹配但方法不匹配，附带允许的方法
    MethodNotAllowed(Vec<HttpRequestMethod>),
    NotFound,
}

// 同一模式下的全部路由，按注册顺序
struct Endpoint<T> {
    pattern: Pattern,
    rest_default: Option<String>,
    routes: Vec<Route<T>>,
}

pub struct Router<T> {
    exact: matchit::Router<usize>,
    subtrees: matchit::Router<usize>,
    endpoints: Vec<Endpoint<T>>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self {
            exact: matchit::Router::new(),
            subtrees: matchit::Router::new(),
            endpoints: Vec::new(),
        }
    }
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一条路由。与已有模式冲突（如 `/a/{x}` 与 `/a/{y}`）时返回错误，路由不生效。
    pub fn add(&mut self, method: HttpRequestMethod, pattern: Pattern, value: T) -> Result<(), Exception> {
        let index = match self.endpoints.iter().position(|e| e.pattern.same_as(&pattern)) {
            Some(index) => index,
            None => self.insert_endpoint(&pattern)?,
        };
        self.endpoints[index].routes.push(Route {
            method,
            pattern,
            value,
        });
        Ok(())
    }

    fn insert_endpoint(&mut self, pattern: &Pattern) -> Result<usize, Exception> {
        let index = self.endpoints.len();
        let matcher = if pattern.subtree {
            &mut self.subtrees
        } else {
            &mut self.exact
        };
        matcher
            .insert(pattern.route.clone(), index)
            .map_err(|e| Exception::InvalidRoute {
                pattern: pattern.raw.clone(),
                reason: e.to_string(),
            })?;

        // `{*name}` 不匹配空余下路径，`/files/` 本身另行登记
        let mut rest_default = None;
        if let Some(name) = &pattern.rest {
            let wildcard = format!("{{*{}}}", name);
            let bare = pattern.route.strip_suffix(wildcard.as_str()).unwrap_or("/").to_string();
            match self.exact.insert(bare.clone(), index) {
                Ok(()) => rest_default = Some(name.clone()),
                Err(e) => debug!("路由 {} 的空余下路径未登记：{}", bare, e),
            }
        }

        self.endpoints.push(Endpoint {
            pattern: pattern.clone(),
            rest_default,
            routes: Vec::new(),
        });
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.endpoints.iter().map(|e| e.routes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // 精确匹配在前，随后是由长到短的各级子树
    fn candidates(&self, path: &str) -> Vec<(usize, HashMap<String, String>)> {
        let mut candidates = Vec::new();
        if let Ok(matched) = self.exact.at(path) {
            candidates.push((*matched.value, collect_params(&matched.params)));
        }
        for (pos, _) in path.rmatch_indices('/') {
            if let Ok(matched) = self.subtrees.at(&path[..=pos]) {
                candidates.push((*matched.value, collect_params(&matched.params)));
            }
        }
        candidates
    }

    /// `HEAD` 请求可由 `GET` 路由响应
    pub fn find(&self, method: HttpRequestMethod, path: &str) -> RouteMatch<'_, T> {
        let mut allowed: Vec<HttpRequestMethod> = Vec::new();

        for (index, mut params) in self.candidates(path) {
            let endpoint = &self.endpoints[index];
            let hit = endpoint.routes.iter().find(|route| {
                route.method == method
                    || (method == HttpRequestMethod::Head && route.method == HttpRequestMethod::Get)
            });
            if let Some(route) = hit {
                if let Some(name) = &endpoint.rest_default {
                    params.entry(name.clone()).or_default();
                }
                return RouteMatch::Found(route, params);
            }
            for route in &endpoint.routes {
                if !allowed.contains(&route.method) {
                    allowed.push(route.method);
                }
            }
        }

        if allowed.is_empty() {
            return RouteMatch::NotFound;
        }
        if allowed.contains(&HttpRequestMethod::Get) && !allowed.contains(&HttpRequestMethod::Head) {
            allowed.push(HttpRequestMethod::Head);
        }
        RouteMatch::MethodNotAllowed(allowed)
    }
}

fn collect_params(params: &matchit::Params) -> HashMap<String, String> {
    params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
