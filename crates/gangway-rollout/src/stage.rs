//! Pipeline stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where in the pipeline a deploy currently is (or stopped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    BackingUp,
    PullingImages,
    Deploying,
    Migrating,
    HealthChecking,
    SmokeTesting,
    CuttingOver,
    CleaningUp,
    RollingBack,
    Failed,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::BackingUp => "backing-up",
            Stage::PullingImages => "pulling-images",
            Stage::Deploying => "deploying",
            Stage::Migrating => "migrating",
            Stage::HealthChecking => "health-checking",
            Stage::SmokeTesting => "smoke-testing",
            Stage::CuttingOver => "cutting-over",
            Stage::CleaningUp => "cleaning-up",
            Stage::RollingBack => "rolling-back",
            Stage::Failed => "failed",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(Stage::HealthChecking.to_string(), "health-checking");
        assert_eq!(Stage::CuttingOver.to_string(), "cutting-over");
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Stage::SmokeTesting).unwrap(),
            "\"smoke_testing\""
        );
    }
}
