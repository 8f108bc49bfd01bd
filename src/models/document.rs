use std::path::Path;

use serde::{Deserialize, Serialize};

/// 待评分的规划书文档
///
/// 由外部文本流水线产出，进入运行后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// 文档 ID（来源文件名）
    pub id: String,
    /// 学生姓名
    pub student_name: String,
    /// 已清洗的正文
    pub text: String,
}

impl Document {
    /// 根据文件名创建文档，学生姓名从文件名推导
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let student_name = derive_student_name(&id);
        Self {
            id,
            student_name,
            text: text.into(),
        }
    }

    /// 显式指定学生姓名
    pub fn with_student_name(mut self, student_name: impl Into<String>) -> Self {
        self.student_name = student_name.into();
        self
    }
}

/// 评分标准
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub text: String,
}

impl Prompt {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// 从文件名提取学生姓名
///
/// `2024级__张三.md` → `张三`；没有 `__` 分隔时返回去掉扩展名的文件名
pub fn derive_student_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());

    match stem.rsplit_once("__") {
        Some((_, name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => stem,
    }
}
