//! 基础设施层（Infrastructure）
//!
//! 持有稀缺资源（磁盘文件），只暴露能力，不认识评分业务：
//! - `JsonlFile`：串行化的追加写 JSONL 文件
//! - `RunLayout`：一次运行在磁盘上的目录结构
//! - `RunStore`：运行清单的保存与加载

pub mod jsonl_file;
pub mod run_layout;
pub mod run_store;

pub use jsonl_file::JsonlFile;
pub use run_layout::RunLayout;
pub use run_store::RunStore;
