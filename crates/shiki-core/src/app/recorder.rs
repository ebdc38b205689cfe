//! EventRecorder - ステップイベント記録の境界
//!
//! 実行エンジンがステップを 1 つ実行するたびに呼ばれます。記録は
//! best-effort：シンクの失敗は警告ログに落とし、実行側へは返しません。

use std::sync::Arc;

use crate::domain::{InstanceId, ProcessEvent, Step, StepKind};
use crate::ports::{Clock, EventSink};

/// Records ELEMENT events for executed flow steps.
pub struct EventRecorder {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    instance_id: InstanceId,
}

impl EventRecorder {
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>, instance_id: InstanceId) -> Self {
        Self {
            sink,
            clock,
            instance_id,
        }
    }

    /// Record one executed step.
    ///
    /// Task calls and expressions produce no ELEMENT events; the kind check
    /// is the whole filter.
    pub async fn after_step(&self, step: &Step) {
        if matches!(step.kind, StepKind::TaskCall | StepKind::Expression) {
            return;
        }

        let event = ProcessEvent::element(step, self.clock.now());
        if let Err(e) = self.sink.record(self.instance_id, event).await {
            tracing::warn!(
                instance = %self.instance_id,
                error = %e,
                "error while sending an event to the server"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    use super::*;
    use crate::domain::ELEMENT_EVENT_TYPE;
    use crate::impls::InMemoryEventSink;
    use crate::ports::FixedClock;

    fn recorder() -> (EventRecorder, Arc<InMemoryEventSink>) {
        let sink = Arc::new(InMemoryEventSink::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let instance_id = InstanceId::from_ulid(Ulid::new());
        (EventRecorder::new(sink.clone(), clock, instance_id), sink)
    }

    #[tokio::test]
    async fn records_flow_calls_and_skips_task_calls() {
        let (recorder, sink) = recorder();

        recorder
            .after_step(&Step::new(StepKind::FlowCall, "main", 3, 1))
            .await;
        recorder
            .after_step(&Step::new(StepKind::TaskCall, "http", 4, 1))
            .await;
        recorder
            .after_step(&Step::new(StepKind::Expression, "${x}", 5, 1))
            .await;
        recorder
            .after_step(&Step::new(StepKind::Other, "checkpoint", 6, 1))
            .await;

        let events = sink.recorded();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1.event_type, ELEMENT_EVENT_TYPE);
        assert_eq!(events[0].1.data["description"], "Flow call: main");
        assert_eq!(events[0].1.data["line"], 3);
        assert_eq!(events[1].1.data["description"], "checkpoint");
    }

    #[tokio::test]
    async fn sink_errors_are_swallowed() {
        let (recorder, sink) = recorder();
        sink.set_failing(true);

        // Must not panic or surface anything.
        recorder
            .after_step(&Step::new(StepKind::FlowCall, "main", 1, 1))
            .await;

        assert!(sink.recorded().is_empty());
    }
}
