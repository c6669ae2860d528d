//! 基础设施层：持有稀缺资源（页面、文件），只暴露能力

pub mod js_executor;
pub mod output_store;
pub mod run_log;

pub use js_executor::{JsExecutor, PageSnapshot};
pub use output_store::OutputStore;
pub use run_log::RunLog;
