use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

const TIMESTAMP_OUTPUT: &str = "%Y-%m-%d %H:%M:%S";

/// 把 Java/Spark 風格的日期格式 (MM-dd-yyyy) 轉成 chrono 格式
pub fn java_pattern_to_chrono(pattern: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("yyyy", "%Y"),
        ("yy", "%y"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
        ("SSS", "%3f"),
    ];

    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;
    'outer: while !rest.is_empty() {
        for (java, chrono_fmt) in TOKENS {
            if let Some(stripped) = rest.strip_prefix(java) {
                out.push_str(chrono_fmt);
                rest = stripped;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}

/// to_timestamp(col, fmt)：無法解析時回傳 Null。
/// 已是 ISO 日期或時間戳的值直接轉換，與日期欄位的行為一致。
pub fn to_timestamp(value: &Value, pattern: &str) -> Value {
    let text = match value {
        Value::String(s) => s.trim(),
        _ => return Value::Null,
    };
    if text.is_empty() {
        return Value::Null;
    }

    let chrono_fmt = java_pattern_to_chrono(pattern);
    let parsed = NaiveDateTime::parse_from_str(text, &chrono_fmt)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, &chrono_fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").ok());

    parsed
        .map(|ts| Value::String(ts.format(TIMESTAMP_OUTPUT).to_string()))
        .unwrap_or(Value::Null)
}
