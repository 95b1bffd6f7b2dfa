use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time, adjusted by whatever offset the (out-of-scope) network
/// time protocol has established with peers. PLCS itself never touches
/// this directly; it flows in only because `Blockchain::push` needs "now"
/// to reject blocks claiming to be from the future.
pub struct NetworkTime {
    offset_millis: i64,
}

impl NetworkTime {
    pub fn new() -> Self {
        NetworkTime { offset_millis: 0 }
    }

    pub fn with_offset(offset_millis: i64) -> Self {
        NetworkTime { offset_millis }
    }

    /// Current time in whole seconds, matching `BlockHeader::timestamp`'s
    /// unit.
    pub fn now(&self) -> u32 {
        let millis = self.now_millis();
        (millis / 1000) as u32
    }

    pub fn now_millis(&self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis() as i64;
        (wall + self.offset_millis).max(0) as u64
    }
}

impl Default for NetworkTime {
    fn default() -> Self {
        NetworkTime::new()
    }
}

pub fn duration_as_millis(d: &Duration) -> u64 {
    d.as_secs() * 1000 + u64::from(d.subsec_millis())
}
