//! AgentCommandQueue port - エージェント宛コマンドの受け渡し

use async_trait::async_trait;

use crate::domain::{AgentCommand, AgentId, ShikiError};

/// Per-agent command mailbox.
///
/// The watchdog writes, the agent's own polling loop consumes. No delivery
/// acknowledgment is tracked.
#[async_trait]
pub trait AgentCommandQueue: Send + Sync {
    async fn insert(&self, command: AgentCommand) -> Result<(), ShikiError>;

    /// Pop the oldest pending command for `agent_id`, if any.
    async fn take_for_agent(&self, agent_id: &AgentId) -> Result<Option<AgentCommand>, ShikiError>;
}
