//! The cluster-wide concurrency limit singleton.
//!
//! Operators set the ceiling through a single well-known cluster object;
//! the controller only ever reads it. Only the current value matters;
//! no history is kept.

use serde::{Deserialize, Serialize};

use crate::run::ObjectMeta;

/// API group/version of the limit object.
pub const LIMIT_API_VERSION: &str = "gantry.dev/v1";

/// Kind of the limit object.
pub const LIMIT_KIND: &str = "GlobalLimit";

/// Well-known name of the singleton.
pub const LIMIT_NAME: &str = "gantry-queue-limit";

/// The limit singleton as stored by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalLimit {
    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: LimitSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitSpec {
    pub max_concurrent: u32,
}

impl GlobalLimit {
    /// The configured ceiling, if valid. Zero is treated as absent so a
    /// mistyped object cannot wedge the whole cluster.
    pub fn max_concurrent(&self) -> Option<u32> {
        (self.spec.max_concurrent > 0).then_some(self.spec.max_concurrent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_wire_shape() {
        let json = serde_json::json!({
            "apiVersion": LIMIT_API_VERSION,
            "kind": LIMIT_KIND,
            "metadata": {"name": LIMIT_NAME},
            "spec": {"maxConcurrent": 10}
        });
        let limit: GlobalLimit = serde_json::from_value(json).unwrap();
        assert_eq!(limit.max_concurrent(), Some(10));
    }

    #[test]
    fn test_zero_is_invalid() {
        let limit = GlobalLimit {
            metadata: ObjectMeta::default(),
            spec: LimitSpec { max_concurrent: 0 },
        };
        assert_eq!(limit.max_concurrent(), None);
    }
}
