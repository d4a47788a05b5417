use std::fs;
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde_derive::{Deserialize, Serialize};

use crate::exception::Exception;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_cache_size")]
    cache_size: usize,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_templates_path")]
    templates_path: String,
    #[serde(default = "default_template_extension")]
    template_extension: String,
    #[serde(default)]
    enable_cache: bool,
    #[serde(default = "default_compression")]
    compression: bool,
    #[serde(default = "default_max_body_size")]
    max_body_size: usize,
}

fn default_port() -> u16 {
    7878
}

fn default_local() -> bool {
    true
}

fn default_cache_size() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_templates_path() -> String {
    "templates".to_string()
}

fn default_template_extension() -> String {
    "html".to_string()
}

fn default_compression() -> bool {
    true
}

fn default_max_body_size() -> usize {
    1048576 // 1MB
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: default_port(),
            local: default_local(),
            worker_threads: 0,
            cache_size: default_cache_size(),
            timeout_secs: default_timeout_secs(),
            log_level: default_log_level(),
            templates_path: default_templates_path(),
            template_extension: default_template_extension(),
            enable_cache: false,
            compression: default_compression(),
            max_body_size: default_max_body_size(),
        }
    }

    pub fn from_toml<P: AsRef<Path>>(filename: P) -> Result<Self, Exception> {
        let filename = filename.as_ref();
        let str_val = fs::read_to_string(filename).map_err(|e| {
            Exception::Config(format!("cannot read {}: {}", filename.display(), e))
        })?;
        Self::from_str(&str_val)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(str_val: &str) -> Result<Self, Exception> {
        let mut raw_config: Config =
            toml::from_str(str_val).map_err(|e| Exception::Config(e.to_string()))?;
        raw_config.normalize();
        Ok(raw_config)
    }

    // 把 0 之类的“自动”取值换算成实际值
    fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用静态文件缓存，因此该值将被改为5。");
            self.cache_size = default_cache_size();
        }
        if self.template_extension.starts_with('.') {
            self.template_extension.remove(0);
        }
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size.max(1)
    }

    /// 请求超时时长，`None` 表示不启用超时中间件
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn templates_path(&self) -> &str {
        &self.templates_path
    }

    pub fn template_extension(&self) -> &str {
        &self.template_extension
    }

    pub fn enable_cache(&self) -> bool {
        self.enable_cache
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

impl Config {
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    pub fn set_timeout_secs(&mut self, secs: u64) -> &mut Self {
        self.timeout_secs = secs;
        self
    }

    pub fn set_templates_path(&mut self, path: &str) -> &mut Self {
        self.templates_path = path.to_string();
        self
    }

    pub fn set_enable_cache(&mut self, enable: bool) -> &mut Self {
        self.enable_cache = enable;
        self
    }

    pub fn set_compression(&mut self, compression: bool) -> &mut Self {
        self.compression = compression;
        self
    }

    pub fn set_max_body_size(&mut self, size: usize) -> &mut Self {
        self.max_body_size = size;
        self
    }
}
