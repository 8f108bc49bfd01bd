use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// 结构化评分记录
///
/// 由 `ResponseNormalizer` 从模型响应中校验生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// 总分
    pub score: f64,
    /// 各维度得分
    pub sub_scores: BTreeMap<String, f64>,
    /// 优势
    pub strengths: Vec<String>,
    /// 不足
    pub gaps: Vec<String>,
    /// 改进建议
    pub suggestions: Vec<String>,
    /// 评分理由
    #[serde(default)]
    pub rationale: String,
    /// 模型返回的学生姓名（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    /// 其余未识别的字段原样保留
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, JsonValue>,
}
