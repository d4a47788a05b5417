// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应构建模块
//!
//! `Response` 是处理函数与中间件之间传递的结果对象，连接处理器最终调用
//! [`Response::as_bytes`] 将其序列化为 HTTP/1.1 报文。
//! 除通用构造函数外，本模块还负责：
//! - 纯文本错误响应（附带 `X-Content-Type-Options: nosniff`）；
//! - 基于 `Accept-Encoding` 的 gzip / deflate / brotli 压缩；
//! - 静态文件响应（MIME 推断 + LRU 文件缓存）。

use std::{
    ffi::OsStr,
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error, warn};

use crate::{cache::FileCache, exception::Exception, param::*};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_encoding: Option<HttpEncoding>,
    date: DateTime<Utc>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    headers: Vec<(String, String)>,
    content: Bytes,
    head_only: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_encoding: None,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            allow: None,
            headers: vec![],
            content: Bytes::new(),
            head_only: false,
        }
    }

    pub fn with_status(code: u16) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response
    }

    /// 构造带内容类型与响应体的响应
    pub fn with_body(code: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut response = Self::with_status(code);
        response.content_type = Some(content_type.to_string());
        response.content = body.into();
        response
    }

    pub fn text(code: u16, body: impl Into<String>) -> Self {
        Self::with_body(code, HEADER_PLAIN_UTF8, body.into())
    }

    pub fn html(code: u16, body: impl Into<Bytes>) -> Self {
        Self::with_body(code, HEADER_HTML_UTF8, body)
    }

    pub fn json_bytes(code: u16, body: impl Into<Bytes>) -> Self {
        Self::with_body(code, HEADER_JSON, body)
    }

    /// 通用错误响应：纯文本、禁止 MIME 嗅探，响应体为错误信息加换行。
    pub fn error(code: u16, message: &str) -> Self {
        let mut response = Self::text(code, format!("{}\n", message));
        response.set_header("X-Content-Type-Options", "nosniff");
        response
    }

    pub fn not_found() -> Self {
        Self::error(404, "404 page not found")
    }

    pub fn method_not_allowed(allowed: Vec<HttpRequestMethod>) -> Self {
        let mut response = Self::error(405, "Method Not Allowed");
        response.allow = Some(allowed);
        response
    }

    /// 将异常转换为错误响应，状态码由 [`Exception::status_code`] 决定
    pub fn from_exception(e: &Exception) -> Self {
        Self::error(e.status_code(), &e.to_string())
    }

    /// 读取静态文件并构造响应，文件内容经由 LRU 缓存。
    pub fn from_file(path: &Path, cache: &Arc<Mutex<FileCache>>, id: u128) -> Result<Self, Exception> {
        let mime = match path.extension() {
            Some(ext) => get_mime(ext),
            None => MIME_FALLBACK,
        };
        debug!("[ID{}]文件 {} 的MIME类型: {}", id, path.display(), mime);

        let mut cache_lock = match cache.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("[ID{}]缓存锁被污染，恢复并继续", id);
                poisoned.into_inner()
            }
        };
        let content = cache_lock.load(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Exception::FileNotFound,
            _ => Exception::Io(e),
        })?;

        Ok(Self::with_body(200, mime, content))
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                warn!("未登记的状态码：{}", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// 设置附加响应头，同名头会被覆盖
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn set_version(&mut self, version: HttpVersion) -> &mut Self {
        self.version = version;
        self
    }

    /// HEAD 请求：保留 Content-Length，但不发送响应体
    pub fn set_head_only(&mut self) -> &mut Self {
        self.head_only = true;
        self
    }

    /// 按客户端支持的编码压缩响应体。压缩失败时保留原始内容。
    pub fn compress_for(&mut self, accept_encoding: &[HttpEncoding], id: u128) -> &mut Self {
        if self.content.is_empty() || self.content_encoding.is_some() {
            return self;
        }
        if let Some(t) = &self.content_type {
            if should_skip_compression(t) {
                debug!("[ID{}]内容类型 {} 跳过压缩", id, t);
                return self;
            }
        }
        let encoding = match decide_encoding(accept_encoding) {
            Some(e) => e,
            None => return self,
        };
        match compress(self.content.to_vec(), Some(encoding)) {
            Ok(c) => {
                self.content = Bytes::from(c);
                self.content_encoding = Some(encoding);
            }
            Err(e) => {
                error!("[ID{}]压缩响应失败: {}，返回未压缩内容", id, e);
            }
        }
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let status_code: &str = &self.status_code.to_string();
        let content_length: &str = &self.content.len().to_string();
        let date: &str = &format_date(&self.date);
        let version = self.version.to_string();

        let mut header = [
            version.as_str(),
            " ",
            status_code,
            " ",
            self.information.as_str(),
            CRLF,
            match &self.content_type {
                Some(t) => ["Content-Type: ", t.as_str(), CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            match self.content_encoding {
                Some(e) => ["Content-Encoding: ", e.to_string().as_str(), CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            "Content-Length: ",
            content_length,
            CRLF,
            "Date: ",
            date,
            CRLF,
            "Server: ",
            self.server_name.as_str(),
            CRLF,
            "Connection: close",
            CRLF,
            match &self.allow {
                Some(a) => {
                    let allow_str = a
                        .iter()
                        .map(|m| m.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    ["Allow: ", allow_str.as_str(), CRLF].concat()
                }
                None => "".to_string(),
            }
            .as_str(),
        ]
        .concat();
        for (name, value) in &self.headers {
            header.push_str(&[name.as_str(), ": ", value.as_str(), CRLF].concat());
        }
        header.push_str(CRLF);

        let body: &[u8] = if self.head_only { b"" } else { &self.content };
        [header.as_bytes(), body].concat()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn allow(&self) -> Option<&[HttpRequestMethod]> {
        self.allow.as_deref()
    }

    pub fn body(&self) -> &Bytes {
        &self.content
    }

    /// 响应体的 UTF-8 文本形式（非法字节以替换字符表示）
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.content).to_string()
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }

    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/",
        "video/",
        "audio/",
        "application/zip",
        "application/gzip",
        "application/wasm",
        "font/woff",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

// gzip 优先，其次 deflate，最后 brotli
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Gzip, HttpEncoding::Deflate, HttpEncoding::Br]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}

fn get_mime(extension: &OsStr) -> &'static str {
    let extension = match extension.to_str() {
        Some(e) => e.to_lowercase(),
        None => {
            error!("无法将&OsStr转换为&str类型");
            return MIME_FALLBACK;
        }
    };
    match MIME_TYPES.get(extension.as_str()) {
        Some(v) => v,
        None => MIME_FALLBACK,
    }
}
