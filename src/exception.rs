// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了框架在请求处理生命周期中可能产生的各类异常情况。
//!
//! - **错误分类**：涵盖协议解析错误、模板扫描/编译/执行错误、分页前置条件错误、
//!   静态文件错误以及请求体绑定错误。
//! - **语义映射**：每个变体都对应特定的失败原因，上层（响应辅助函数、引擎分发）
//!   据此将其转化为对应的 HTTP 状态码。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 框架处理请求过程中发生的异常类型。
#[derive(Debug, Error)]
pub enum Exception {
    /// 请求字节流无法解析为合法的 UTF-8 字符串。
    #[error("Request bytes can't be parsed in UTF-8")]
    RequestIsNotUtf8,
    /// 请求行或请求头格式不合法。
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    /// 客户端使用了框架不认识的 HTTP 方法。
    #[error("Unsupported request method")]
    UnSupportedRequestMethod,
    /// 客户端使用了不支持的 HTTP 协议版本。
    #[error("Unsupported HTTP version")]
    UnsupportedHttpVersion,
    /// 请求体超过配置允许的最大长度。对应 `413`。
    #[error("Request body too large ({0} bytes)")]
    PayloadTooLarge(usize),

    /// 路由模式非法，或与已注册的模式冲突。
    #[error("Invalid route {pattern}: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    /// 请求的路径包含越权尝试（如目录遍历）。对应 `400 Bad Request`。
    #[error("Invalid path (400)")]
    InvalidPath,
    /// 静态目录中未找到所请求的文件。对应 `404 Not Found`。
    #[error("File not found (404)")]
    FileNotFound,
    /// 注册静态文件服务时指定的目录不存在。
    #[error("Static directory {0} does not exist")]
    StaticDirNotFound(PathBuf),

    /// 扫描模板目录失败（目录不可读、权限不足等），整个模板缓存构建随之中止。
    #[error("Failed to scan templates: {0}")]
    TemplateScan(String),
    /// 模板源文件语法错误，整个模板缓存构建随之中止。
    #[error("Failed to compile template {name}: {reason}")]
    TemplateCompile { name: String, reason: String },
    /// 已成功扫描的模板集合中不存在所请求的名称。
    #[error("Template {0} not found in cache")]
    TemplateNotFound(String),
    /// 模板运行期错误，本次渲染中止且不写出任何字节。
    #[error("Failed to execute template {name}: {reason}")]
    TemplateExecute { name: String, reason: String },
    /// 当前引擎未配置渲染器。
    #[error("No HTML renderer configured")]
    RendererMissing,

    /// 每页元素数不是正数，分页计算无法进行。
    #[error("Invalid page size {0}, elements per page must be positive")]
    InvalidPageSize(i64),
    /// 分页选取的范围超出了调用方传入集合的实际长度。
    #[error("Page range {start}..{end} out of bounds for collection of length {len}")]
    PageOutOfBounds { start: usize, end: usize, len: usize },

    /// 请求体的 Content-Type 与绑定方式不匹配。
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    /// 请求体无法反序列化为目标类型。
    #[error("Failed to bind request: {0}")]
    Binding(String),
    /// 响应体序列化失败。
    #[error("Failed to serialize response: {0}")]
    Serialize(String),

    /// 配置文件读取或解析失败。
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// 日志系统初始化失败。
    #[error("Failed to initialize logger: {0}")]
    Logger(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Exception {
    /// 将异常映射为最贴切的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        use Exception::*;
        match self {
            RequestIsNotUtf8 | MalformedRequest(_) | InvalidPath | Binding(_) => 400,
            FileNotFound | StaticDirNotFound(_) => 404,
            UnSupportedRequestMethod => 405,
            PayloadTooLarge(_) => 413,
            UnsupportedMediaType(_) => 415,
            UnsupportedHttpVersion => 505,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(Exception::InvalidPath.status_code(), 400);
        assert_eq!(Exception::FileNotFound.status_code(), 404);
        assert_eq!(Exception::PayloadTooLarge(10).status_code(), 413);
        assert_eq!(
            Exception::TemplateNotFound("page.index.html".to_string()).status_code(),
            500
        );
    }

    #[test]
    fn test_display_names_template() {
        let e = Exception::TemplateNotFound("page.missing.html".to_string());
        assert_eq!(e.to_string(), "Template page.missing.html not found in cache");
    }
}
