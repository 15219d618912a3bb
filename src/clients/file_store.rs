/// 补全服务的文件存储客户端
///
/// 封装文档上传 / 删除，文件在一次流水线运行期间有效
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::clients::completion::FileRef;
use crate::config::Config;
use crate::error::{AppError, AppResult, FileError};

/// 共享 HTTP 客户端（连接复用）
static HTTP_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// 文档上传与清理能力
#[async_trait]
pub trait FileStore: Send + Sync {
    /// 上传本地文档，返回可在请求中引用的句柄
    async fn upload(&self, path: &Path) -> AppResult<FileRef>;

    /// 删除已上传的文档
    async fn delete(&self, file: &FileRef) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

/// OpenAI 兼容 `/files` 端点
pub struct OpenAiFileStore {
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiFileStore {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config.llm_api_base_url.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn upload_failed(
        path: &Path,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> AppError {
        AppError::File(FileError::UploadFailed {
            path: path.display().to_string(),
            source: Box::new(source),
        })
    }
}

#[async_trait]
impl FileStore for OpenAiFileStore {
    async fn upload(&self, path: &Path) -> AppResult<FileRef> {
        if !path.exists() {
            return Err(AppError::File(FileError::NotFound {
                path: path.display().to_string(),
            }));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());

        debug!("上传文件: {} ({} 字节)", file_name, bytes.len());

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("application/pdf")
            .map_err(|e| Self::upload_failed(path, e))?;
        let form = Form::new().text("purpose", "assistants").part("file", part);

        let response = HTTP_CLIENT
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::upload_failed(path, e))?;

        let uploaded: UploadedFile = response
            .json()
            .await
            .map_err(|e| Self::upload_failed(path, e))?;

        info!("📤 已上传: {} -> {}", file_name, uploaded.id);
        Ok(FileRef::new(uploaded.id))
    }

    async fn delete(&self, file: &FileRef) -> AppResult<()> {
        HTTP_CLIENT
            .delete(format!("{}/files/{}", self.base_url, file))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                AppError::File(FileError::DeleteFailed {
                    file_id: file.to_string(),
                    source: Box::new(e),
                })
            })?;

        debug!("🗑️ 已删除远端文件: {}", file);
        Ok(())
    }
}
