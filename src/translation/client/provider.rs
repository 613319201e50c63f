//! 外部函数调用接口
//!
//! 翻译服务被视为一个不透明的后端函数：`invoke(endpoint, body) -> JSON`。

use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::translation::error::TranslationResult;

/// 调用后端函数
pub trait FunctionInvoker {
    fn invoke<'a>(
        &'a self,
        endpoint: &'a str,
        body: &'a Value,
    ) -> LocalBoxFuture<'a, TranslationResult<Value>>;
}

/// 通过 HTTP POST 调用 `{base_url}/{endpoint}`
#[cfg(feature = "http")]
pub struct HttpInvoker {
    client: reqwest::Client,
    base_url: url::Url,
    api_key: Option<String>,
}

#[cfg(feature = "http")]
impl HttpInvoker {
    pub fn new(base_url: &str, api_key: Option<String>) -> TranslationResult<Self> {
        use crate::translation::error::TranslationError;

        let base_url = url::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| TranslationError::ConfigError(format!("无效的接口地址 {}: {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| TranslationError::ConfigError(format!("创建HTTP客户端失败: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn from_config(config: &crate::translation::config::PipelineConfig) -> TranslationResult<Self> {
        Self::new(&config.api_url, config.api_key.clone())
    }
}

#[cfg(feature = "http")]
impl FunctionInvoker for HttpInvoker {
    fn invoke<'a>(
        &'a self,
        endpoint: &'a str,
        body: &'a Value,
    ) -> LocalBoxFuture<'a, TranslationResult<Value>> {
        use crate::translation::error::TranslationError;

        Box::pin(async move {
            let url = self
                .base_url
                .join(endpoint.trim_start_matches('/'))
                .map_err(|e| TranslationError::InvalidInput(format!("无效的函数名 {}: {}", endpoint, e)))?;

            let mut request = self.client.post(url).json(body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(TranslationError::RateLimitExceeded);
            }
            if status.is_server_error() {
                return Err(TranslationError::NetworkError(format!(
                    "函数 {} 返回 {}",
                    endpoint, status
                )));
            }
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(TranslationError::InvalidInput(format!(
                    "函数 {} 拒绝请求 {}: {}",
                    endpoint, status, detail
                )));
            }

            Ok(response.json::<Value>().await?)
        })
    }
}
