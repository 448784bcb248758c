//! Exchange configuration shared by producers and consumers

use std::time::Duration;

use crate::layout::MIN_REGION_SIZE;

/// Protocol name of the shared region
pub const REGION_NAME: &str = "Global\\HWiNFO_SENS_SM2";

/// Protocol name of the mutex guarding mutable fields
pub const MUTEX_NAME: &str = "Global\\HWiNFO_SM2_MUTEX";

/// Default bounded wait for the named mutex
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// A pre-existing region with the classic magic and more sensors than this
/// is treated as a genuine monitoring agent.
pub const DEFAULT_CONFLICT_THRESHOLD: u32 = 5;

/// Exchange configuration
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Protocol name of the shared region
    pub region_name: String,
    /// Protocol name of the named mutex
    pub mutex_name: String,
    /// Lower bound of the region size in bytes
    pub min_region_size: usize,
    /// Bounded wait for the named mutex
    pub lock_timeout: Duration,
    /// Sensor count above which an existing region is a genuine agent
    pub conflict_sensor_threshold: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            region_name: REGION_NAME.to_string(),
            mutex_name: MUTEX_NAME.to_string(),
            min_region_size: MIN_REGION_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            conflict_sensor_threshold: DEFAULT_CONFLICT_THRESHOLD,
        }
    }
}

impl ExchangeConfig {
    /// Use custom region and mutex names
    pub fn with_names(mut self, region_name: impl Into<String>, mutex_name: impl Into<String>) -> Self {
        self.region_name = region_name.into();
        self.mutex_name = mutex_name.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_conflict_threshold(mut self, threshold: u32) -> Self {
        self.conflict_sensor_threshold = threshold;
        self
    }

    pub fn with_min_region_size(mut self, size: usize) -> Self {
        self.min_region_size = size;
        self
    }
}
