//! InMemoryEventSink - 記録するだけのイベントシンク（開発・テスト用）

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::domain::{InstanceId, ProcessEvent, ShikiError};
use crate::ports::EventSink;

#[derive(Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<(InstanceId, ProcessEvent)>>,

    /// When set, record() fails; used to exercise best-effort call sites.
    failing: AtomicBool,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<(InstanceId, ProcessEvent)> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn record(&self, instance_id: InstanceId, event: ProcessEvent) -> Result<(), ShikiError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ShikiError::Storage("event sink unavailable".to_string()));
        }

        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push((instance_id, event));
        Ok(())
    }
}
