use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One completed visit, as emitted on the observation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VisitReport {
    Found {
        node: String,
        content: String,
        depth: usize,
    },
    Failed {
        node: String,
        message: String,
        depth: usize,
    },
}

impl VisitReport {
    pub fn found(node: impl Into<String>, content: impl Into<String>, depth: usize) -> Self {
        Self::Found {
            node: node.into(),
            content: content.into(),
            depth,
        }
    }

    pub fn failed(node: impl Into<String>, message: impl Into<String>, depth: usize) -> Self {
        Self::Failed {
            node: node.into(),
            message: message.into(),
            depth,
        }
    }

    pub fn node(&self) -> &str {
        match self {
            Self::Found { node, .. } | Self::Failed { node, .. } => node,
        }
    }

    /// Depth budget the reporting task still had when it visited the node.
    pub fn depth(&self) -> usize {
        match self {
            Self::Found { depth, .. } | Self::Failed { depth, .. } => *depth,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Found { content, .. } => Some(content),
            Self::Failed { .. } => None,
        }
    }
}

impl fmt::Display for VisitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found { node, content, .. } => write!(f, "found: {} {:?}", node, content),
            Self::Failed { message, .. } => write!(f, "{}", message),
        }
    }
}

/// Sink for visit reports. Called from whichever task finished the visit.
pub type ReportCallback = Arc<dyn Fn(&VisitReport) + Send + Sync>;
