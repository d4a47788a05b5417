//! # 模板缓存构建
//!
//! 扫描模板目录，按文件名把模板分为两类：
//!
//! - 共享模板：文件名包含 `layout` 或 `fragment`，被所有可渲染模板引用；
//! - 可渲染模板：文件名包含 `page` 或 `component`，每个都单独编译成一个单元。
//!
//! 每个编译单元包含全部共享模板加上该可渲染模板本身，以可渲染模板的文件名
//! （含扩展名，不含目录）为键存入 [`TemplateCache`]。模板之间也按文件名互相引用，
//! 例如 `{% extends "layout.base.html" %}`。

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use minijinja::{AutoEscape, Environment, Value};
use walkdir::WalkDir;

use crate::exception::Exception;

/// 文件名到编译单元的映射
pub type TemplateCache = HashMap<String, CompiledTemplate>;

/// 模板文件在缓存构建中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// 仅作为共享模板
    Shared,
    /// 仅作为可渲染模板
    Leaf,
    /// 同时满足两类命名规则：单独编译，同时也加入共享列表
    Both,
    /// 不参与缓存
    Ignored,
}

impl FileRole {
    pub fn classify(file_name: &str) -> FileRole {
        let leaf = file_name.contains("page") || file_name.contains("component");
        let shared = file_name.contains("layout") || file_name.contains("fragment");
        match (leaf, shared) {
            (true, true) => FileRole::Both,
            (true, false) => FileRole::Leaf,
            (false, true) => FileRole::Shared,
            (false, false) => FileRole::Ignored,
        }
    }

    pub fn is_shared(self) -> bool {
        matches!(self, FileRole::Shared | FileRole::Both)
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, FileRole::Leaf | FileRole::Both)
    }
}

/// 一个可渲染模板的编译单元
#[derive(Debug)]
pub struct CompiledTemplate {
    name: String,
    env: Environment<'static>,
}

impl CompiledTemplate {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 编译单元中包含的全部模板名（共享模板 + 自身）
    pub fn template_names(&self) -> Vec<&str> {
        self.env.templates().map(|(name, _)| name).collect()
    }

    /// 以给定上下文执行模板，返回完整的输出
    pub fn execute(&self, context: Value) -> Result<String, Exception> {
        let template = self
            .env
            .get_template(&self.name)
            .map_err(|e| Exception::TemplateExecute {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        template
            .render(context)
            .map_err(|e| Exception::TemplateExecute {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

/// 递归查找 `root` 下扩展名为 `extension` 的文件，保留遍历顺序。
pub fn find_template_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>, Exception> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Exception::TemplateScan(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension() == Some(OsStr::new(extension)) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn read_source(path: &Path) -> Result<String, Exception> {
    fs::read_to_string(path)
        .map_err(|e| Exception::TemplateScan(format!("{}: {}", path.display(), e)))
}

/// 构建模板缓存。任意一个文件编译失败时整个构建失败，不返回部分结果。
pub fn build_template_cache(
    root: &Path,
    extension: &str,
    functions: &BTreeMap<String, Value>,
) -> Result<TemplateCache, Exception> {
    let files = find_template_files(root, extension)?;

    let mut shared = Vec::new();
    let mut leaves = Vec::new();
    for path in &files {
        let name = base_name(path);
        let role = FileRole::classify(&name);
        if role == FileRole::Ignored {
            trace!("忽略模板文件：{}", path.display());
            continue;
        }
        let source = read_source(path)?;
        if role.is_shared() {
            shared.push((name.clone(), source.clone()));
        }
        if role.is_leaf() {
            leaves.push((name, source));
        }
    }

    let mut cache = TemplateCache::with_capacity(leaves.len());
    for (name, source) in leaves {
        let env = compile_unit(&name, &source, &shared, functions)?;
        debug!("模板已编译：{}（共享模板 {} 个）", name, shared.len());
        cache.insert(name.clone(), CompiledTemplate { name, env });
    }
    Ok(cache)
}

fn compile_unit(
    name: &str,
    source: &str,
    shared: &[(String, String)],
    functions: &BTreeMap<String, Value>,
) -> Result<Environment<'static>, Exception> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    for (function_name, function) in functions {
        env.add_global(function_name.clone(), function.clone());
    }

    let compile_error = |template: &str, e: minijinja::Error| Exception::TemplateCompile {
        name: template.to_string(),
        reason: e.to_string(),
    };

    for (shared_name, shared_source) in shared {
        env.add_template_owned(shared_name.clone(), shared_source.clone())
            .map_err(|e| compile_error(shared_name.as_str(), e))?;
    }
    env.add_template_owned(name.to_string(), source.to_string())
        .map_err(|e| compile_error(name, e))?;
    Ok(env)
}
