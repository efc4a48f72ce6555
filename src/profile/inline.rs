//! 参数内联：将 `$.Parameters.<Name>` 引用替换为 Profile 级参数的值
//!
//! 整值引用（参数值恰好是一个引用）保留被引用值的类型；嵌入在字符串中的引用按文本替换。
//! Profile 级参数之间也允许互相引用，最多解析 `MAX_DEPTH` 层，超过视为循环引用。

use std::sync::OnceLock;

use regex::Regex;

use super::params::{ParamValue, Parameters};
use super::types::{ComponentDescriptor, Profile};
use crate::core::VcError;

const MAX_DEPTH: usize = 16;

static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();

fn reference_pattern() -> &'static Regex {
    REFERENCE_RE.get_or_init(|| Regex::new(r"(?i)\$\.Parameters\.([A-Za-z0-9_]+)").unwrap())
}

/// 值中是否还含有引用标记
pub fn has_reference(value: &ParamValue) -> bool {
    value
        .as_text()
        .is_some_and(|s| reference_pattern().is_match(s))
}

/// 解析 Profile 中全部引用，返回不含引用标记的 Profile
pub fn inline_profile(mut profile: Profile) -> Result<Profile, VcError> {
    let resolved = resolve_profile_parameters(&profile.parameters)?;

    for descriptor in profile
        .dependencies
        .iter_mut()
        .chain(profile.actions.iter_mut())
        .chain(profile.monitors.iter_mut())
    {
        inline_descriptor(descriptor, &resolved)?;
    }
    inline_parameters(&mut profile.metadata, &resolved)?;
    profile.parameters = resolved;
    Ok(profile)
}

fn inline_descriptor(
    descriptor: &mut ComponentDescriptor,
    source: &Parameters,
) -> Result<(), VcError> {
    inline_parameters(&mut descriptor.parameters, source).map_err(|e| match e {
        VcError::InvalidConfiguration { message, .. } => VcError::schema(format!(
            "{} in component '{}'",
            message, descriptor.component_type
        )),
        other => other,
    })?;
    for child in descriptor.components.iter_mut() {
        inline_descriptor(child, source)?;
    }
    Ok(())
}

/// 用 `source` 中的值替换 `target` 中的全部引用
pub fn inline_parameters(target: &mut Parameters, source: &Parameters) -> Result<(), VcError> {
    for (_, value) in target.iter_mut() {
        *value = substitute(value, source)?;
    }
    Ok(())
}

/// Profile 级参数内部的互相引用，逐层展开
fn resolve_profile_parameters(parameters: &Parameters) -> Result<Parameters, VcError> {
    let mut current = parameters.clone();
    for _ in 0..MAX_DEPTH {
        if !current.iter().any(|(_, v)| has_reference(v)) {
            return Ok(current);
        }
        let snapshot = current.clone();
        inline_parameters(&mut current, &snapshot)?;
    }
    Err(VcError::schema(
        "profile parameters contain circular '$.Parameters' references",
    ))
}

fn substitute(value: &ParamValue, source: &Parameters) -> Result<ParamValue, VcError> {
    let Some(text) = value.as_text() else {
        return Ok(value.clone());
    };
    let pattern = reference_pattern();

    // 整值引用：保留原类型
    if let Some(caps) = pattern.captures(text.trim()) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(text.trim().len()) {
            return lookup(&caps[1], source).cloned();
        }
    }

    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        result.push_str(&text[last..whole.0]);
        result.push_str(&lookup(&caps[1], source)?.to_string());
        last = whole.1;
    }
    if last == 0 {
        return Ok(value.clone());
    }
    result.push_str(&text[last..]);
    Ok(ParamValue::Text(result))
}

fn lookup<'a>(name: &str, source: &'a Parameters) -> Result<&'a ParamValue, VcError> {
    source.get(name).ok_or_else(|| {
        VcError::schema(format!(
            "parameter reference '$.Parameters.{name}' does not match any profile parameter"
        ))
    })
}
