//! Manager for backends whose lifecycle is handled elsewhere.

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Manager, ManagerError, ManagerState};

/// Backend without automation: every operation fails with `NotAutomated`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnmanagedManager;

impl UnmanagedManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Manager for UnmanagedManager {
    async fn start(&self) -> Result<(), ManagerError> {
        Err(ManagerError::NotAutomated)
    }

    async fn state(&self) -> Result<ManagerState, ManagerError> {
        Err(ManagerError::NotAutomated)
    }

    async fn dial(&self) -> Result<TcpStream, ManagerError> {
        Err(ManagerError::NotAutomated)
    }
}
