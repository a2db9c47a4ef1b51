//! Turns user-level resource intents ("20m", 0.5 CPUs) into the numeric
//! limits the engine's host config understands.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Engine-native resource limits. `None` fields are left out of the create
/// call entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory: Option<i64>,
    pub memory_swap: Option<i64>,
    pub memory_swappiness: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub storage_opt: Option<BTreeMap<String, String>>,
}

pub fn translate(
    memory: Option<&str>,
    memory_swap: Option<&str>,
    cpus: Option<f64>,
    storage_opt: Option<&BTreeMap<String, String>>,
) -> Result<ResourceLimits> {
    let memory = memory.map(parse_size).transpose()?;
    let memory_swap = memory_swap.map(parse_size).transpose()?;
    let nano_cpus = cpus.map(nano_cpus).transpose()?;

    Ok(ResourceLimits {
        // Swap is pinned off whenever memory is capped, so the cap is real.
        memory_swappiness: memory.map(|_| 0),
        memory,
        memory_swap,
        nano_cpus,
        storage_opt: storage_opt.filter(|opts| !opts.is_empty()).cloned(),
    })
}

/// CPU share expressed in billionths of a core.
pub fn nano_cpus(cpus: f64) -> Result<i64> {
    if !cpus.is_finite() || cpus <= 0.0 {
        return Err(Error::InvalidConstraint(format!(
            "cpus must be a positive number, got {}",
            cpus
        )));
    }
    Ok((cpus * 1e9).round() as i64)
}

/// Parses sizes like `512`, `20m`, `1.5g` or `64MB` into bytes (1024-based).
/// `-1` is passed through as the engine's "unlimited".
pub fn parse_size(input: &str) -> Result<i64> {
    let s = input.trim();
    if s == "-1" {
        return Ok(-1);
    }
    let invalid = || Error::InvalidConstraint(format!("invalid size '{}'", input));

    let lower = s.to_ascii_lowercase();
    // "64mb" and "64m" mean the same thing
    let unit_part = lower.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.');
    let digits = &lower[..lower.len() - unit_part.len()];
    let unit = match unit_part {
        "" | "b" => 1i64,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        "t" | "tb" => 1 << 40,
        _ => return Err(invalid()),
    };
    if digits.is_empty() {
        return Err(invalid());
    }
    let value: f64 = digits.parse().map_err(|_| invalid())?;
    let bytes = (value * unit as f64).round();
    if !bytes.is_finite() || bytes > i64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as i64)
}
