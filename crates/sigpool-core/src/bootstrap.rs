//! Launch inputs handed to the compute API: the launch template reference and
//! the bootstrap payload a new instance runs on first boot.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

pub const DEFAULT_PLACEHOLDER: &str = "%MATCHMAKER_IP%";

const DEFAULT_TEMPLATE: &str = "#!/bin/sh
set -eu
exec /opt/signalling/start.sh --matchmaker %MATCHMAKER_IP%
";

/// Opaque startup payload with a single substitution point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapTemplate {
    text: String,
    placeholder: String,
}

impl BootstrapTemplate {
    pub fn new(text: impl Into<String>, placeholder: impl Into<String>) -> Result<Self> {
        let placeholder = placeholder.into();
        if placeholder.is_empty() {
            return Err(CoreError::InvalidRequest(
                "bootstrap placeholder cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            text: text.into(),
            placeholder,
        })
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn contains_placeholder(&self) -> bool {
        self.text.contains(&self.placeholder)
    }

    pub fn render(&self, value: &str) -> String {
        self.text.replace(&self.placeholder, value)
    }

    /// Rendered payload, base64 encoded as compute launch APIs expect.
    pub fn encode(&self, value: &str) -> String {
        STANDARD.encode(self.render(value).as_bytes())
    }
}

impl Default for BootstrapTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

/// Launch template reference; `lt-` prefixed values are template ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LaunchTemplateRef {
    Id(String),
    Name(String),
}

impl LaunchTemplateRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CoreError::InvalidRequest(
                "launch template reference cannot be empty".to_string(),
            ));
        }

        if raw.starts_with("lt-") {
            Ok(Self::Id(raw.to_string()))
        } else {
            Ok(Self::Name(raw.to_string()))
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Id(value) | Self::Name(value) => value,
        }
    }

    pub fn version(&self) -> &'static str {
        "$Latest"
    }
}
