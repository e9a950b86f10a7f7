//! Work sources feeding the supervising loop
//!
//! The loop blocks on [`WorkSource::next_work`] between iterations. A source
//! that returns `None` has no more work and ends the worker.

use crate::error::{Error, Result};
use crate::registrar::DEFAULT_FIELD;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// One unit of registration work against the river's index
#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    RegisterTerm {
        field: String,
        value: String,
        id: Option<String>,
    },
    RegisterTerms {
        field: String,
        values: Vec<String>,
        bulk: bool,
    },
    RegisterQuery {
        query: Value,
        id: Option<String>,
    },
}

impl Work {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Work::RegisterTerm {
            field: field.into(),
            value: value.into(),
            id: None,
        }
    }

    /// Term query against the catch-all field
    pub fn all(value: impl Into<String>) -> Self {
        Self::term(DEFAULT_FIELD, value)
    }

    /// Parse `field:value`, or a bare value for the catch-all field
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match line.split_once(':') {
            Some((field, value)) if !field.trim().is_empty() && !value.trim().is_empty() => {
                Some(Self::term(field.trim(), value.trim()))
            }
            _ => Some(Self::all(line)),
        }
    }
}

#[async_trait]
pub trait WorkSource: Send {
    /// Wait for the next item. `None` means the source is exhausted.
    async fn next_work(&mut self) -> Option<Work>;
}

/// Receiving half of a work channel
pub struct ChannelSource {
    receiver: mpsc::Receiver<Work>,
}

/// Cloneable sending half of a work channel
#[derive(Clone)]
pub struct WorkSender {
    sender: mpsc::Sender<Work>,
}

/// Bounded work channel
pub fn channel(capacity: usize) -> (WorkSender, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity);
    (WorkSender { sender }, ChannelSource { receiver })
}

impl WorkSender {
    /// Queue work, waiting for capacity. Fails once the river is gone.
    pub async fn send(&self, work: Work) -> Result<()> {
        self.sender.send(work).await.map_err(|_| Error::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl WorkSource for ChannelSource {
    async fn next_work(&mut self) -> Option<Work> {
        self.receiver.recv().await
    }
}

/// Fixed demonstration registrations, then exhausted
pub struct DemoBatch {
    items: VecDeque<Work>,
}

impl DemoBatch {
    pub fn new() -> Self {
        Self {
            items: VecDeque::from([
                Work::all("jason"),
                Work::term("content", "nyse"),
                Work::term("content", "google"),
                Work::term("content", "apple"),
            ]),
        }
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl Default for DemoBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkSource for DemoBatch {
    async fn next_work(&mut self) -> Option<Work> {
        self.items.pop_front()
    }
}
