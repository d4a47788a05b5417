// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、查询字符串、版本）。
//! 2. 请求头（Headers）的提取，字段名大小写不敏感。
//! 3. 请求体的截取，以及 `application/x-www-form-urlencoded` 表单的解码。
//! 4. 内容协商（Content Negotiation）相关的编码解析。

use bytes::Bytes;
use log::error;

use crate::{exception::Exception, param::*};

/// 表示一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// 请求的资源路径（不含查询字符串）
    path: String,
    /// 原始查询字符串（不含 `?`）
    query: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 全部请求头，字段名统一为小写，保持报文中的顺序
    headers: Vec<(String, String)>,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// 解码后的查询参数
    query_pairs: Vec<(String, String)>,
    /// 解码后的表单参数（仅当请求体为 urlencoded 表单时存在）
    form_pairs: Vec<(String, String)>,
    /// 请求体
    body: Bytes,
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 定位请求头与请求体的分界（`\r\n\r\n`），缺失时视整个缓冲区为请求头。
    /// 2. 验证编码：确保请求头部分是合法的 UTF-8 字符串。
    /// 3. 解析请求行：提取方法、路径、查询字符串和协议版本。
    /// 4. 迭代解析标头，并根据 `Content-Length` 截取请求体。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, rest) = match find_header_end(buffer) {
            Some(end) => (&buffer[..end], &buffer[end + HEADER_TERMINATOR.len()..]),
            None => (buffer, &buffer[buffer.len()..]),
        };

        let request_string = match std::str::from_utf8(head) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);
        let first_line = request_lines.next().unwrap_or_default();

        // 解析请求行 (e.g., "GET /index.html?page=2 HTTP/1.1")
        let first_line_parts: Vec<&str> = first_line.split(' ').collect();
        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, first_line);
            return Err(Exception::MalformedRequest(first_line.to_string()));
        }

        let method = match HttpRequestMethod::parse(first_line_parts[0]) {
            Some(m) => m,
            None => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, first_line_parts[0]);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 路径中可能包含空格（虽然不规范），通过 join 尝试恢复
        let target = first_line_parts[1..first_line_parts.len() - 1].join(" ");
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (target, String::new()),
        };

        let mut headers = Vec::new();
        for line in request_lines {
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.trim().to_lowercase(), value.trim().to_string()))
                }
                None => {
                    error!("[ID{}]无法解析的请求头：{}", id, line);
                    return Err(Exception::MalformedRequest(line.to_string()));
                }
            }
        }

        let mut request = Self {
            method,
            path,
            query,
            version,
            headers,
            accept_encoding: vec![],
            query_pairs: vec![],
            form_pairs: vec![],
            body: Bytes::new(),
        };

        // 请求体以 Content-Length 为准，多余的字节丢弃
        let body_len = match request.content_length() {
            Some(len) => len.min(rest.len()),
            None => rest.len(),
        };
        request.body = Bytes::copy_from_slice(&rest[..body_len]);

        request.accept_encoding = parse_accept_encoding(request.header("accept-encoding"));
        request.query_pairs = decode_pairs(&request.query);
        if request
            .content_type()
            .map_or(false, |t| t.starts_with(HEADER_FORM))
        {
            request.form_pairs = decode_pairs(&String::from_utf8_lossy(&request.body));
        }

        Ok(request)
    }
}

/// 查找请求头结束位置（`\r\n\r\n` 的起点）
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// 从尚未完整的请求头中读取 `Content-Length`，供连接处理器决定还需读取多少字节
pub fn peek_content_length(head: &[u8]) -> Option<usize> {
    let head = std::str::from_utf8(head).ok()?;
    head.split(CRLF).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

// 这里的逻辑比较简单，只要包含关键词即视为支持
fn parse_accept_encoding(value: Option<&str>) -> Vec<HttpEncoding> {
    let mut accept_encoding = vec![];
    if let Some(encoding) = value {
        if encoding.contains("gzip") {
            accept_encoding.push(HttpEncoding::Gzip);
        }
        if encoding.contains("deflate") {
            accept_encoding.push(HttpEncoding::Deflate);
        }
        if encoding.contains("br") {
            accept_encoding.push(HttpEncoding::Br);
        }
    }
    accept_encoding
}

fn decode_pairs(raw: &str) -> Vec<(String, String)> {
    if raw.is_empty() {
        return vec![];
    }
    serde_urlencoded::from_str(raw).unwrap_or_default()
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 获取请求路径（不含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取原始查询字符串
    pub fn raw_query(&self) -> &str {
        &self.query
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 按名称（不区分大小写）获取请求头的第一个值
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or_default()
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &[HttpEncoding] {
        &self.accept_encoding
    }

    pub fn accept(&self) -> Option<&str> {
        self.header("accept")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 查询参数的第一个值
    pub fn query(&self, key: &str) -> Option<&str> {
        first_value(&self.query_pairs, key)
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query_pairs
    }

    /// 表单参数的第一个值（仅 urlencoded 请求体）
    pub fn post_form(&self, key: &str) -> Option<&str> {
        first_value(&self.form_pairs, key)
    }

    pub fn form_pairs(&self) -> &[(String, String)] {
        &self.form_pairs
    }

    /// 表单值查找：请求体中的表单参数优先，其次是查询参数。
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.post_form(key).or_else(|| self.query(key))
    }
}

fn first_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
