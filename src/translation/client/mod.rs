//! 翻译服务客户端
//!
//! - `provider`: 后端函数调用接口及 HTTP 实现
//! - `request`: 去重、结果缓存、批量调用
//! - `retry`: 指数退避重试

pub mod provider;
pub mod request;
pub mod retry;

#[cfg(feature = "http")]
pub use provider::HttpInvoker;
pub use provider::FunctionInvoker;
pub use request::{
    identity_key, InvokeOptions, InvokeResponse, RequestClient, TranslationOutcome,
    TranslationRequest,
};
pub use retry::{with_retry, RetryPolicy};
