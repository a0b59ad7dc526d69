//! Target configuration: the hardware constants every lowering consults.
//!
//! A target is described by a small TOML file:
//!
//! ```toml
//! [target]
//! name = "xe-hpc"
//! warp_size = 16
//! num_warps = 8
//!
//! [limits]
//! max_block_row_bytes = 64
//! max_block_bytes = 2048
//! ```
//!
//! Missing keys fall back to the built-in Xe defaults.

use std::path::Path;

use serde::Deserialize;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// Lowering target configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetConfig {
    /// Short identifier (e.g. "xe").
    pub name: String,
    /// Lanes per warp (sub-group size).
    pub warp_size: u32,
    /// Warps per CTA.
    pub num_warps: u32,
    /// CTAs per cluster.
    pub num_ctas: u32,
    /// Maximum bytes one 2-D block transfer moves per row (one cache line).
    pub max_block_row_bytes: u32,
    /// Maximum bytes one 2-D block transfer moves in total.
    pub max_block_bytes: u32,
    /// Widest linear vector transfer, in bits.
    pub max_vector_bits: u32,
    /// Whether 16-bit atomics may be emulated with a 32-bit CAS loop.
    pub allow_emulated_atomics: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::xe()
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    target: TargetSection,
    #[serde(default)]
    limits: LimitsSection,
    #[serde(default)]
    atomics: AtomicsSection,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TargetSection {
    name: Option<String>,
    warp_size: Option<u32>,
    num_warps: Option<u32>,
    num_ctas: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LimitsSection {
    max_block_row_bytes: Option<u32>,
    max_block_bytes: Option<u32>,
    max_vector_bits: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AtomicsSection {
    allow_emulation: Option<bool>,
}

impl TargetConfig {
    /// Built-in Xe configuration (16-lane sub-groups, 64-byte cache lines).
    pub fn xe() -> Self {
        Self {
            name: "xe".to_string(),
            warp_size: 16,
            num_warps: 4,
            num_ctas: 1,
            max_block_row_bytes: 64,
            max_block_bytes: 2048,
            max_vector_bits: 128,
            allow_emulated_atomics: true,
        }
    }

    pub fn with_num_warps(mut self, num_warps: u32) -> Self {
        self.num_warps = num_warps;
        self
    }

    pub fn with_num_ctas(mut self, num_ctas: u32) -> Self {
        self.num_ctas = num_ctas;
        self
    }

    pub fn with_warp_size(mut self, warp_size: u32) -> Self {
        self.warp_size = warp_size;
        self
    }

    /// Threads per CTA.
    pub fn threads_per_cta(&self) -> u32 {
        self.warp_size * self.num_warps
    }

    /// Load a target configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read target config '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse_toml(&content).map_err(|d| {
            let message = format!("{}: {}", path.display(), d.message);
            Diagnostic { message, ..d }
        })
    }

    /// Parse a target configuration from TOML text.
    pub fn parse_toml(content: &str) -> Result<Self, Diagnostic> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| {
            let span = e
                .span()
                .map(|r| Span::new(0, r.start as u32, r.end as u32))
                .unwrap_or_default();
            Diagnostic::error(format!("invalid target config: {}", e.message()), span)
        })?;

        let base = Self::xe();
        let config = Self {
            name: file.target.name.unwrap_or(base.name),
            warp_size: file.target.warp_size.unwrap_or(base.warp_size),
            num_warps: file.target.num_warps.unwrap_or(base.num_warps),
            num_ctas: file.target.num_ctas.unwrap_or(base.num_ctas),
            max_block_row_bytes: file
                .limits
                .max_block_row_bytes
                .unwrap_or(base.max_block_row_bytes),
            max_block_bytes: file.limits.max_block_bytes.unwrap_or(base.max_block_bytes),
            max_vector_bits: file.limits.max_vector_bits.unwrap_or(base.max_vector_bits),
            allow_emulated_atomics: file
                .atomics
                .allow_emulation
                .unwrap_or(base.allow_emulated_atomics),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the lowerings cannot honor.
    pub fn validate(&self) -> Result<(), Diagnostic> {
        let err = |msg: String| Diagnostic::error(msg, Span::dummy());
        for (key, value) in [
            ("warp_size", self.warp_size),
            ("num_warps", self.num_warps),
            ("num_ctas", self.num_ctas),
        ] {
            if value == 0 || !value.is_power_of_two() {
                return Err(err(format!(
                    "target.{} must be a non-zero power of two, got {}",
                    key, value
                )));
            }
        }
        if self.max_block_row_bytes == 0 || self.max_block_row_bytes > self.max_block_bytes {
            return Err(err(format!(
                "limits.max_block_row_bytes ({}) must be in 1..=max_block_bytes ({})",
                self.max_block_row_bytes, self.max_block_bytes
            ))
            .with_help("a block row is at most one cache line".to_string()));
        }
        if !matches!(self.max_vector_bits, 32 | 64 | 128 | 256 | 512) {
            return Err(err(format!(
                "limits.max_vector_bits must be one of 32, 64, 128, 256, 512, got {}",
                self.max_vector_bits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
