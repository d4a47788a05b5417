//! # HTML 渲染器
//!
//! `Render` 持有模板目录、扩展名、辅助函数以及一份延迟构建的模板缓存。
//!
//! - `enable_cache == false`：每次渲染都从磁盘重新构建缓存，修改模板后刷新即可看到效果；
//! - `enable_cache == true`：第一次渲染时构建一次（由互斥锁串行化），之后一直复用。
//!
//! 渲染先写入内存缓冲区，执行成功后才一次性写入目标，失败时目标不会收到任何内容。

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::debug;
use minijinja::Value;
use serde_derive::{Deserialize, Serialize};

use crate::{
    config::Config,
    exception::Exception,
    pages::Pages,
    template::{build_template_cache, TemplateCache},
};

/// 传递给模板的数据
pub type Data = BTreeMap<String, serde_json::Value>;

/// 一次渲染所需的全部数据，模板中以 `data` 与 `pages` 访问
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateData {
    pub data: Data,
    pub pages: Option<Pages>,
}

impl TemplateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Data) -> Self {
        Self { data, pages: None }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<serde_json::Value>) -> &mut Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn set_pages(&mut self, pages: Pages) -> &mut Self {
        self.pages = Some(pages);
        self
    }

    fn to_context(&self) -> Value {
        let pages = match self.pages {
            Some(pages) => Value::from_object(pages),
            None => Value::from(()),
        };
        minijinja::context! {
            data => Value::from_serialize(&self.data),
            pages => pages,
        }
    }
}

/// 模板辅助函数 `default(fallback, value)`：`value` 缺失或仅含空白时返回 `fallback`
pub fn default_if_empty(fallback: Value, value: Option<Value>) -> Value {
    let blank = match &value {
        None => true,
        Some(v) if v.is_undefined() || v.is_none() => true,
        Some(v) => v.as_str().map(|s| s.trim().is_empty()).unwrap_or(false),
    };
    if blank {
        fallback
    } else {
        value.unwrap_or(fallback)
    }
}

pub struct Render {
    enable_cache: bool,
    templates_path: PathBuf,
    extension: String,
    functions: BTreeMap<String, Value>,
    cache: Mutex<Option<Arc<TemplateCache>>>,
}

impl Default for Render {
    fn default() -> Self {
        Self::new()
    }
}

impl Render {
    pub fn new() -> Self {
        let mut functions = BTreeMap::new();
        functions.insert(
            "default".to_string(),
            Value::from_function(default_if_empty),
        );
        Self {
            enable_cache: false,
            templates_path: PathBuf::from("templates"),
            extension: "html".to_string(),
            functions,
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .enable_cache(config.enable_cache())
            .templates_path(config.templates_path())
            .extension(config.template_extension())
    }

    pub fn enable_cache(mut self, enable: bool) -> Self {
        self.enable_cache = enable;
        self
    }

    pub fn templates_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.templates_path = path.into();
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// 注册辅助函数，同名函数会被覆盖
    pub fn function(mut self, name: &str, function: Value) -> Self {
        self.functions.insert(name.to_string(), function);
        self
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.enable_cache
    }

    pub fn get_templates_path(&self) -> &PathBuf {
        &self.templates_path
    }

    /// 渲染名为 `name` 的模板并写入 `sink`。
    pub fn template<W: Write>(
        &self,
        sink: &mut W,
        name: &str,
        data: Option<&TemplateData>,
    ) -> Result<(), Exception> {
        let empty = TemplateData::default();
        let data = data.unwrap_or(&empty);

        let cache = self.template_cache()?;
        let template = cache
            .get(name)
            .ok_or_else(|| Exception::TemplateNotFound(name.to_string()))?;

        let buffer = template.execute(data.to_context())?;
        sink.write_all(buffer.as_bytes())?;
        Ok(())
    }

    /// 获取当前有效的模板缓存。
    pub fn template_cache(&self) -> Result<Arc<TemplateCache>, Exception> {
        if !self.enable_cache {
            debug!("模板缓存已关闭，重新构建：{}", self.templates_path.display());
            return self.build().map(Arc::new);
        }

        let mut guard = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cache) = guard.as_ref() {
            return Ok(Arc::clone(cache));
        }
        let cache = Arc::new(self.build()?);
        debug!("模板缓存已构建，共 {} 个模板", cache.len());
        *guard = Some(Arc::clone(&cache));
        Ok(cache)
    }

    fn build(&self) -> Result<TemplateCache, Exception> {
        build_template_cache(&self.templates_path, &self.extension, &self.functions)
    }
}
