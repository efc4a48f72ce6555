//! 依赖包查找
//!
//! 核心只需要 `get_package(name) -> Option<PackagePath>`；找不到即视为依赖缺失，
//! 由编排器转为中止整个运行的错误。下载与安装不在这里。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::core::VcError;
use crate::platform::PlatformArchitecture;

/// 已就位的依赖包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePath {
    pub name: String,
    pub path: PathBuf,
}

impl PackagePath {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// 平台专属子目录（如 `<pkg>/linux-x64`），不存在时回退到包根目录
    pub fn platform_path(&self, platform: &PlatformArchitecture) -> PathBuf {
        let specific = self.path.join(platform.to_string());
        if specific.is_dir() {
            specific
        } else {
            self.path.clone()
        }
    }
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    /// 按名称（大小写不敏感）查找；`None` 表示未安装
    async fn get_package(&self, name: &str) -> Result<Option<PackagePath>, VcError>;

    /// 查找并要求存在，否则返回依赖缺失错误
    async fn require_package(&self, name: &str) -> Result<PackagePath, VcError> {
        self.get_package(name).await?.ok_or_else(|| {
            VcError::dependency_missing(format!(
                "package '{name}' is not installed on this system"
            ))
        })
    }
}

/// 目录包管理器：包目录下的每个子目录（或 `*.vcpkg` 描述文件所在目录）即一个包
pub struct DirectoryPackageManager {
    root: PathBuf,
    /// 额外登记的包（如安装到其它位置的工具）
    registered: RwLock<HashMap<String, PackagePath>>,
}

impl DirectoryPackageManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registered: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn register(&self, package: PackagePath) {
        tracing::debug!(package = %package.name, path = %package.path.display(), "package registered");
        self.registered
            .write()
            .await
            .insert(package.name.to_lowercase(), package);
    }

    fn scan(root: &Path, name: &str) -> Option<PackagePath> {
        if !root.is_dir() {
            return None;
        }
        let wanted_manifest = format!("{}.vcpkg", name.to_lowercase());
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
        {
            let file_name = entry.file_name().to_string_lossy().to_lowercase();
            if entry.depth() == 1 && entry.file_type().is_dir() && file_name == name.to_lowercase() {
                return Some(PackagePath::new(name, entry.path()));
            }
            if entry.file_type().is_file() && file_name == wanted_manifest {
                let dir = entry.path().parent().unwrap_or(root);
                return Some(PackagePath::new(name, dir));
            }
        }
        None
    }
}

#[async_trait]
impl PackageManager for DirectoryPackageManager {
    async fn get_package(&self, name: &str) -> Result<Option<PackagePath>, VcError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VcError::invalid_config("package name must not be empty"));
        }
        if let Some(p) = self.registered.read().await.get(&name.to_lowercase()) {
            return Ok(Some(p.clone()));
        }

        let root = self.root.clone();
        let wanted = name.to_string();
        let found = tokio::task::spawn_blocking(move || Self::scan(&root, &wanted))
            .await
            .map_err(|e| VcError::InvalidOperation(format!("package scan failed: {e}")))?;
        Ok(found)
    }
}
