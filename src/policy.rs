use crate::core::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Resource class of the host; drives the default resident capacity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    #[default]
    Standard,
    Constrained,
}

impl DeviceClass {
    pub fn default_capacity(self) -> usize {
        match self {
            Self::Standard => 4,
            Self::Constrained => 2,
        }
    }
}

/// Tuning knobs for the runtime cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeCachePolicy {
    /// Maximum number of resident workspace runtimes.
    pub capacity: usize,
    /// How long an evicted workspace's captured state stays queryable.
    pub eviction_grace_ms: u64,
    /// Capture/persist cooldown after a runtime is populated from a snapshot.
    pub capture_cooldown_ms: u64,
    /// Periodic save of dirty resident runtimes; disabled when `None`.
    #[serde(default)]
    pub autosave_interval_ms: Option<u64>,
    /// Interval of the background maintenance tick.
    pub maintenance_interval_ms: u64,
    /// How many non-resident workspaces keep their last known revision, so a
    /// recreated runtime never starts below it.
    #[serde(default = "default_revision_history")]
    pub revision_history: usize,
}

fn default_revision_history() -> usize {
    1024
}

impl Default for RuntimeCachePolicy {
    fn default() -> Self {
        Self::for_device_class(DeviceClass::Standard)
    }
}

impl RuntimeCachePolicy {
    pub fn for_device_class(class: DeviceClass) -> Self {
        Self {
            capacity: class.default_capacity(),
            eviction_grace_ms: 30_000,
            capture_cooldown_ms: 500,
            autosave_interval_ms: None,
            maintenance_interval_ms: 250,
            revision_history: default_revision_history(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_eviction_grace_ms(mut self, grace_ms: u64) -> Self {
        self.eviction_grace_ms = grace_ms;
        self
    }

    pub fn with_capture_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.capture_cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_autosave_interval_ms(mut self, interval_ms: Option<u64>) -> Self {
        self.autosave_interval_ms = interval_ms;
        self
    }

    pub fn with_revision_history(mut self, entries: usize) -> Self {
        self.revision_history = entries;
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let policy = serde_json::from_str::<Self>(raw)
            .map_err(|err| RuntimeError::InvalidPolicy(err.to_string()))?;
        Ok(normalize_policy(policy))
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_ms)
    }

    pub fn capture_cooldown(&self) -> Duration {
        Duration::from_millis(self.capture_cooldown_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

/// Clamps values that would make the cache unusable.
pub fn normalize_policy(mut policy: RuntimeCachePolicy) -> RuntimeCachePolicy {
    policy.capacity = policy.capacity.max(1);
    policy.maintenance_interval_ms = policy.maintenance_interval_ms.max(10);
    policy.autosave_interval_ms = policy.autosave_interval_ms.map(|ms| ms.max(10));
    policy.revision_history = policy.revision_history.max(1);
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_classes_have_distinct_capacities() {
        assert_eq!(RuntimeCachePolicy::for_device_class(DeviceClass::Standard).capacity, 4);
        assert_eq!(RuntimeCachePolicy::for_device_class(DeviceClass::Constrained).capacity, 2);
    }

    #[test]
    fn normalize_clamps_zero_capacity() {
        let policy = normalize_policy(RuntimeCachePolicy::default().with_capacity(0));
        assert_eq!(policy.capacity, 1);
    }

    #[test]
    fn policy_loads_from_json_and_is_normalized() {
        let policy = RuntimeCachePolicy::from_json_str(
            r#"{"capacity":0,"eviction_grace_ms":1000,"capture_cooldown_ms":50,"maintenance_interval_ms":1}"#,
        )
        .unwrap();
        assert_eq!(policy.capacity, 1);
        assert_eq!(policy.eviction_grace_ms, 1000);
        assert_eq!(policy.autosave_interval_ms, None);
        assert_eq!(policy.maintenance_interval_ms, 10);
        assert_eq!(policy.revision_history, 1024);
    }

    #[test]
    fn malformed_policy_is_rejected() {
        let err = RuntimeCachePolicy::from_json_str("{").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidPolicy(_)));
    }
}
