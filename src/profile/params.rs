//! 组件参数：大小写不敏感的标量键值表
//!
//! 值只允许字符串、数字、布尔；列表以 `,` 或 `;` 分隔的字符串表示。
//! 类型转换在这里集中完成，组件在构造时一次性解析为自己的强类型配置。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::VcError;

/// 参数标量值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 布尔值；接受 "true"/"false"/"1"/"0"（大小写不敏感）
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Integer(i) => Some(*i != 0),
            Self::Float(_) => None,
            Self::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

/// 参数表：保留原始键名，查找时忽略大小写
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// 插入或覆盖（若已有大小写不同的同名键，沿用原键名）
    pub fn insert(&mut self, key: &str, value: impl Into<ParamValue>) {
        let existing = self.find_key(key).map(str::to_string);
        self.0
            .insert(existing.unwrap_or_else(|| key.to_string()), value.into());
    }

    fn find_key(&self, key: &str) -> Option<&str> {
        self.0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.find_key(key).and_then(|k| self.0.get(k))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find_key(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut ParamValue)> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 字符串形式（任何标量都可转为字符串）；空白字符串视为未设置
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(ToString::to_string)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn require_string(&self, key: &str) -> Result<String, VcError> {
        self.get_string(key)
            .ok_or_else(|| VcError::invalid_config(format!("required parameter '{key}' is not defined")))
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, VcError> {
        self.typed(key, ParamValue::to_bool, "a boolean")
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, VcError> {
        self.typed(key, ParamValue::to_i64, "an integer")
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, VcError> {
        self.typed(key, ParamValue::to_f64, "a number")
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, VcError> {
        Ok(self.get_bool(key)?.unwrap_or(default))
    }

    /// 分隔字符串列表（`,` 或 `;`），去空白、去空项
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| split_list(&v.to_string()))
            .unwrap_or_default()
    }

    fn typed<T>(
        &self,
        key: &str,
        convert: impl Fn(&ParamValue) -> Option<T>,
        expected: &str,
    ) -> Result<Option<T>, VcError> {
        match self.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(v) => convert(v).map(Some).ok_or_else(|| {
                VcError::invalid_config(format!(
                    "parameter '{key}' must be {expected} (value: '{v}')"
                ))
            }),
        }
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl FromIterator<(String, ParamValue)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        let mut p = Parameters::new();
        for (k, v) in iter {
            p.insert(&k, v);
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup_and_insert() {
        let mut p = Parameters::new().with("CommandLine", "--run");
        assert_eq!(p.get_string("commandline").as_deref(), Some("--run"));
        p.insert("COMMANDLINE", "--other");
        assert_eq!(p.len(), 1);
        assert_eq!(p.iter().next().unwrap().0, "CommandLine");
    }

    #[test]
    fn test_typed_coercion() {
        let p = Parameters::new()
            .with("Flag", "True")
            .with("Count", "12")
            .with("Native", 7i64)
            .with("Bad", "maybe");
        assert_eq!(p.get_bool("flag").unwrap(), Some(true));
        assert_eq!(p.get_i64("count").unwrap(), Some(12));
        assert_eq!(p.get_i64("native").unwrap(), Some(7));
        assert!(p.get_bool("bad").is_err());
        assert_eq!(p.get_bool("missing").unwrap(), None);
    }

    #[test]
    fn test_list_split() {
        let p = Parameters::new().with("Codes", "0, 1;;2");
        assert_eq!(p.get_list("codes"), vec!["0", "1", "2"]);
    }

    #[test]
    fn test_deserialize_scalar_types() {
        let p: Parameters =
            serde_json::from_str(r#"{"A": true, "B": 3, "C": 1.5, "D": "x"}"#).unwrap();
        assert_eq!(p.get("a"), Some(&ParamValue::Bool(true)));
        assert_eq!(p.get("b"), Some(&ParamValue::Integer(3)));
        assert_eq!(p.get("c"), Some(&ParamValue::Float(1.5)));
        assert_eq!(p.get("d"), Some(&ParamValue::Text("x".into())));
    }
}
