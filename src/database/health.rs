//! Database connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use super::current_time_ms;

/// Connection health status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// A validated handle is installed
    Connected = 0,
    /// A reconnect is draining or swapping the handle
    Reconnecting = 1,
    /// No handle is installed (never opened, failed swap, or closed)
    Disconnected = 2,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl From<u8> for ConnectionStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Connected,
            1 => ConnectionStatus::Reconnecting,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

/// Lock-free health tracker for the managed connection
pub struct ConnectionHealth {
    status: AtomicU8,
    last_connected: AtomicI64,
    failed_attempts: AtomicU32,
    total_reconnects: AtomicU32,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(ConnectionStatus::Disconnected as u8),
            last_connected: AtomicI64::new(0),
            failed_attempts: AtomicU32::new(0),
            total_reconnects: AtomicU32::new(0),
        }
    }

    /// Mark a freshly validated handle as installed
    pub fn set_connected(&self) {
        let previous = self
            .status
            .swap(ConnectionStatus::Connected as u8, Ordering::AcqRel);
        self.last_connected
            .store(current_time_ms(), Ordering::Release);

        if previous == ConnectionStatus::Reconnecting as u8 {
            self.total_reconnects.fetch_add(1, Ordering::AcqRel);
        }
        self.failed_attempts.store(0, Ordering::Release);
    }

    pub fn set_reconnecting(&self) {
        self.status
            .store(ConnectionStatus::Reconnecting as u8, Ordering::Release);
    }

    /// Mark the handle as missing after a failed connect
    pub fn set_failed(&self) {
        self.status
            .store(ConnectionStatus::Disconnected as u8, Ordering::Release);
        self.failed_attempts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_disconnected(&self) {
        self.status
            .store(ConnectionStatus::Disconnected as u8, Ordering::Release);
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn stats(&self) -> ConnectionHealthStats {
        ConnectionHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected.load(Ordering::Acquire),
            failed_attempts: self.failed_attempts.load(Ordering::Acquire),
            total_reconnects: self.total_reconnects.load(Ordering::Acquire),
        }
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection health statistics
#[derive(Debug, Clone)]
pub struct ConnectionHealthStats {
    pub status: ConnectionStatus,
    pub last_connected_ms: i64,
    pub failed_attempts: u32,
    pub total_reconnects: u32,
}
