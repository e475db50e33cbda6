//! 配置校验模块
//!
//! 校验规则：
//! - 字段级约束 (非空、容量 > 0) 由 `validator` derive 完成
//! - 至少一个数据源，stream 名唯一
//! - sink 名唯一，驱动与 sink 种类匹配
//! - 轮询数据源：interval_secs > 0，布局可轮询，数组布局带 unique_key
//! - 结构化路由齐全 (raw 布局除外)，原始路由带 topic
//! - 配置了 sink 的种类至少有一条路由

use std::collections::HashSet;

use contracts::{ContractError, RelayBlueprint, SinkKind, SourceKind};
use ::validator::Validate;

/// 校验 RelayBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &RelayBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_datasources(blueprint)?;
    validate_poll_sources(blueprint)?;
    validate_sinks(blueprint)?;
    validate_routes(blueprint)?;
    Ok(())
}

/// 字段级约束
fn validate_fields(blueprint: &RelayBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|e| ContractError::config_validation("blueprint", e.to_string()))
}

/// 校验数据源非空且 stream 唯一
fn validate_datasources(blueprint: &RelayBlueprint) -> Result<(), ContractError> {
    if blueprint.datasources.is_empty() {
        return Err(ContractError::config_validation(
            "datasources",
            "at least one datasource is required",
        ));
    }

    let mut seen = HashSet::new();
    for ds in &blueprint.datasources {
        if !seen.insert(ds.stream.as_str()) {
            return Err(ContractError::config_validation(
                format!("datasources[stream={}]", ds.stream),
                "duplicate stream",
            ));
        }
        if ds.layout.requires_unique_key() && ds.unique_key.as_deref().unwrap_or("").is_empty()
        {
            return Err(ContractError::config_validation(
                format!("datasources[{}].unique_key", ds.stream),
                format!("layout '{}' requires a unique_key", ds.layout),
            ));
        }
    }
    Ok(())
}

/// 校验轮询数据源
fn validate_poll_sources(blueprint: &RelayBlueprint) -> Result<(), ContractError> {
    for ds in blueprint
        .datasources
        .iter()
        .filter(|ds| ds.source == SourceKind::Poll)
    {
        if ds.interval_secs == 0 {
            return Err(ContractError::config_validation(
                format!("datasources[{}].interval_secs", ds.stream),
                "interval_secs must be > 0",
            ));
        }
        if !ds.layout.is_pollable() {
            return Err(ContractError::config_validation(
                format!("datasources[{}].layout", ds.stream),
                format!("layout '{}' cannot be polled", ds.layout),
            ));
        }
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(blueprint: &RelayBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for sink in &blueprint.sinks {
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if !sink.driver.supports(sink.kind) {
            return Err(ContractError::config_validation(
                format!("sinks[{}].driver", sink.name),
                format!(
                    "driver {:?} does not support sink kind {:?}",
                    sink.driver, sink.kind
                ),
            ));
        }
    }
    Ok(())
}

/// 校验每个已配置 sink 种类的路由
fn validate_routes(blueprint: &RelayBlueprint) -> Result<(), ContractError> {
    for kind in [SinkKind::Tsdb, SinkKind::Pubsub] {
        if !blueprint.sinks.iter().any(|s| s.kind == kind) {
            continue;
        }
        let table = blueprint.route_table(kind)?;
        if table.is_empty() {
            return Err(ContractError::config_validation(
                format!("datasources.{}", kind_section(kind)),
                format!(
                    "{:?} sinks are configured but no datasource has a [{}] route",
                    kind,
                    kind_section(kind)
                ),
            ));
        }
    }
    Ok(())
}

fn kind_section(kind: SinkKind) -> &'static str {
    match kind {
        SinkKind::Tsdb => "tsdb",
        SinkKind::Pubsub => "pubsub",
    }
}
