//! Core value types shared across the gateway: message precedence,
//! classification levels, and the message lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Message handling precedence, ordered FLASH > IMMEDIATE > PRIORITY > ROUTINE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Precedence {
    Flash,
    Immediate,
    Priority,
    Routine,
}

impl Precedence {
    /// Maximum end-to-end latency budget before a message is considered late.
    pub fn max_latency_ms(self) -> u64 {
        match self {
            Precedence::Flash => 100,
            Precedence::Immediate => 500,
            Precedence::Priority => 2_000,
            Precedence::Routine => 10_000,
        }
    }

    /// Lower value drains first.
    pub fn priority_value(self) -> u8 {
        match self {
            Precedence::Flash => 1,
            Precedence::Immediate => 2,
            Precedence::Priority => 3,
            Precedence::Routine => 4,
        }
    }

    pub fn all() -> [Precedence; 4] {
        [
            Precedence::Flash,
            Precedence::Immediate,
            Precedence::Priority,
            Precedence::Routine,
        ]
    }

    /// 0-based slot for array/atomic-counter indexing.
    pub fn index(self) -> usize {
        self.priority_value() as usize - 1
    }
}

impl Ord for Precedence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority_value().cmp(&other.priority_value())
    }
}

impl PartialOrd for Precedence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Precedence::Flash => "FLASH",
            Precedence::Immediate => "IMMEDIATE",
            Precedence::Priority => "PRIORITY",
            Precedence::Routine => "ROUTINE",
        };
        write!(f, "{s}")
    }
}

/// Classification hierarchy, ordered UNCLASSIFIED < CONFIDENTIAL < SECRET < TOP_SECRET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Unclassified,
    Confidential,
    Secret,
    TopSecret,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Unclassified => "UNCLASSIFIED",
            Classification::Confidential => "CONFIDENTIAL",
            Classification::Secret => "SECRET",
            Classification::TopSecret => "TOP_SECRET",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a submitted message.
///
/// `Pending` is the only entry state. `Stored` means the message was
/// accepted onto the priority queue for later delivery by the drain
/// worker; `Queued` is the degraded best-effort state entered only when
/// that initial enqueue attempt itself failed, pending background
/// retry. `Stored` advances to `Transmitted` once the drain worker
/// delivers the entry, or to `Expired` if its TTL elapses first. See
/// `src/pipeline/mod.rs` for the transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Pending,
    Transmitted,
    Stored,
    Queued,
    Failed,
    Expired,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Transmitted => "TRANSMITTED",
            MessageStatus::Stored => "STORED",
            MessageStatus::Queued => "QUEUED",
            MessageStatus::Failed => "FAILED",
            MessageStatus::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_orders_by_urgency() {
        assert!(Precedence::Flash < Precedence::Immediate);
        assert!(Precedence::Immediate < Precedence::Priority);
        assert!(Precedence::Priority < Precedence::Routine);
    }

    #[test]
    fn classification_orders_by_sensitivity() {
        assert!(Classification::Unclassified < Classification::Confidential);
        assert!(Classification::Confidential < Classification::Secret);
        assert!(Classification::Secret < Classification::TopSecret);
    }
}
