//! 响应规范化 - 业务能力层
//!
//! 只负责"把模型的自由文本变成结构化评分"，不关心调用和重试
//!
//! 模型经常在 JSON 前后加说明文字或代码块标记，这里用括号配对扫描
//! 找出候选的 `{...}` 片段（会跳过字符串里的括号和转义），从左到右
//! 尝试解析，第一个能解析成 JSON 对象的片段胜出，再做字段校验。

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::error::ResponseFormatError;
use crate::models::ScoreRecord;

/// 找到从 `start`（必须是 `{`）开始的配对 `}`，返回其后一个字节的位置
fn matching_brace_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// 按出现顺序列出所有括号配对的候选片段
fn candidate_spans(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(move |(start, _)| {
            matching_brace_end(text, start).map(|end| &text[start..end])
        })
}

/// 提取文本中第一个括号配对的 `{...}` 片段
///
/// ```
/// use planbook_scorer::services::extract_json_object;
///
/// let text = r#"分析如下：{"score": 90, "note": "含 } 的字符串"} 谢谢"#;
/// assert_eq!(
///     extract_json_object(text),
///     Some(r#"{"score": 90, "note": "含 } 的字符串"}"#)
/// );
/// assert_eq!(extract_json_object("没有结构化内容"), None);
/// ```
pub fn extract_json_object(text: &str) -> Option<&str> {
    candidate_spans(text).next()
}

/// 响应规范化器
pub struct ResponseNormalizer;

impl ResponseNormalizer {
    /// 把原始响应解析为评分记录
    ///
    /// 必填字段：`score`（或 `final_score`）、`sub_scores`、`strengths`、
    /// `gaps`、`suggestions`。没有 `sub_scores` 时，收集顶层以 `_score`
    /// 结尾的数值字段作为各维度得分。
    pub fn normalize(raw: &str) -> Result<ScoreRecord, ResponseFormatError> {
        let object = Self::locate_object(raw)?;
        Self::validate(object)
    }

    fn locate_object(raw: &str) -> Result<Map<String, JsonValue>, ResponseFormatError> {
        let mut last_error = None;

        for span in candidate_spans(raw) {
            match serde_json::from_str::<JsonValue>(span) {
                Ok(JsonValue::Object(object)) => return Ok(object),
                Ok(_) => last_error = Some(ResponseFormatError::NotAnObject),
                Err(e) => {
                    debug!("候选片段解析失败: {}", e);
                    last_error = Some(ResponseFormatError::InvalidJson(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or(ResponseFormatError::NoStructuredPayload))
    }

    fn validate(mut object: Map<String, JsonValue>) -> Result<ScoreRecord, ResponseFormatError> {
        let score = match take_present(&mut object, "score")
            .or_else(|| take_present(&mut object, "final_score"))
        {
            Some(value) => coerce_number("score", &value)?,
            None => return Err(ResponseFormatError::MissingField("score")),
        };

        let sub_scores = match take_present(&mut object, "sub_scores") {
            Some(value) => coerce_sub_scores(&value)?,
            None => {
                let flat = collect_flat_sub_scores(&object);
                if flat.is_empty() {
                    return Err(ResponseFormatError::MissingField("sub_scores"));
                }
                flat
            }
        };

        let strengths = required_list(&mut object, "strengths")?;
        let gaps = required_list(&mut object, "gaps")?;
        let suggestions = required_list(&mut object, "suggestions")?;

        let rationale = take_present(&mut object, "rationale")
            .map(|v| text_of(&v))
            .unwrap_or_default();
        let student_name = take_present(&mut object, "student_name")
            .map(|v| text_of(&v).trim().to_string())
            .filter(|name| !name.is_empty());

        Ok(ScoreRecord {
            score,
            sub_scores,
            strengths,
            gaps,
            suggestions,
            rationale,
            student_name,
            extra: object,
        })
    }
}

/// 取出字段，`null` 视为不存在
fn take_present(object: &mut Map<String, JsonValue>, field: &str) -> Option<JsonValue> {
    object.remove(field).filter(|v| !v.is_null())
}

fn coerce_number(field: &'static str, value: &JsonValue) -> Result<f64, ResponseFormatError> {
    let number = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(ResponseFormatError::InvalidField {
            field,
            reason: format!("不是数值: {}", value),
        }),
    }
}

/// 维度得分可以是数值、数值字符串，或带 `score` 字段的对象
fn coerce_sub_scores(value: &JsonValue) -> Result<BTreeMap<String, f64>, ResponseFormatError> {
    let JsonValue::Object(entries) = value else {
        return Err(ResponseFormatError::InvalidField {
            field: "sub_scores",
            reason: "应为对象".to_string(),
        });
    };

    let mut sub_scores = BTreeMap::new();
    for (name, entry) in entries {
        let entry = match entry {
            JsonValue::Object(inner) => inner.get("score").unwrap_or(&JsonValue::Null),
            other => other,
        };
        let score = coerce_number("sub_scores", entry).map_err(|_| {
            ResponseFormatError::InvalidField {
                field: "sub_scores",
                reason: format!("{} 不是数值", name),
            }
        })?;
        sub_scores.insert(name.clone(), score);
    }

    Ok(sub_scores)
}

fn collect_flat_sub_scores(object: &Map<String, JsonValue>) -> BTreeMap<String, f64> {
    object
        .iter()
        .filter(|(name, _)| name.ends_with("_score"))
        .filter_map(|(name, value)| {
            coerce_number("sub_scores", value)
                .ok()
                .map(|score| (name.clone(), score))
        })
        .collect()
}

fn required_list(
    object: &mut Map<String, JsonValue>,
    field: &'static str,
) -> Result<Vec<String>, ResponseFormatError> {
    let value = take_present(object, field).ok_or(ResponseFormatError::MissingField(field))?;

    match value {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| match item {
                JsonValue::Array(_) | JsonValue::Object(_) => {
                    Err(ResponseFormatError::InvalidField {
                        field,
                        reason: "列表元素应为文本".to_string(),
                    })
                }
                other => Ok(text_of(other)),
            })
            .collect(),
        JsonValue::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        JsonValue::String(s) => Ok(vec![s]),
        other => Err(ResponseFormatError::InvalidField {
            field,
            reason: format!("应为列表: {}", other),
        }),
    }
}

fn text_of(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
