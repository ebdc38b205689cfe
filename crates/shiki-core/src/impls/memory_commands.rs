//! InMemoryCommandQueue - エージェント宛コマンドのメールボックス
//!
//! # 実装詳細
//! - HashMap<AgentId, VecDeque<AgentCommand>> でエージェントごとに FIFO を管理
//! - Mutex で排他制御（エージェント側は自分のループで poll する）

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{AgentCommand, AgentId, ShikiError};
use crate::ports::AgentCommandQueue;

#[derive(Default)]
pub struct InMemoryCommandQueue {
    queues: Mutex<HashMap<AgentId, VecDeque<AgentCommand>>>,
}

impl InMemoryCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending commands for an agent (observability, tests).
    pub fn pending_for(&self, agent_id: &AgentId) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(agent_id).map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AgentCommandQueue for InMemoryCommandQueue {
    async fn insert(&self, command: AgentCommand) -> Result<(), ShikiError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .entry(command.agent_id.clone())
            .or_default()
            .push_back(command);
        Ok(())
    }

    async fn take_for_agent(&self, agent_id: &AgentId) -> Result<Option<AgentCommand>, ShikiError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queues.get_mut(agent_id).and_then(|q| q.pop_front()))
    }
}
