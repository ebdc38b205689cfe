//! Out-of-band agent commands.

use serde::{Deserialize, Serialize};

use super::{AgentId, CommandId, InstanceId};

/// What the agent is asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Stop executing the given process.
    CancelProcess { instance_id: InstanceId },
}

/// An instruction addressed to a specific agent.
///
/// Fire-and-forget: written by the watchdog, consumed by the agent's own
/// polling loop. Delivery and application are the agent's responsibility;
/// the core tracks no acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub command_id: CommandId,
    pub agent_id: AgentId,
    pub kind: CommandKind,
}

impl AgentCommand {
    pub fn cancel(command_id: CommandId, agent_id: AgentId, instance_id: InstanceId) -> Self {
        Self {
            command_id,
            agent_id,
            kind: CommandKind::CancelProcess { instance_id },
        }
    }
}
