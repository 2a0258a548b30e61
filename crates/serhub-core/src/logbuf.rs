use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serhub_decode::DecodedFrame;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

/// One timestamped, directional unit of terminal text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedLine {
    pub timestamp: i64,
    pub direction: Direction,
    pub data: String,
    /// Bytes actually written, for outbound lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<DecodedFrame>,
}

impl CapturedLine {
    pub fn inbound(data: String, frames: Vec<DecodedFrame>) -> Self {
        Self {
            timestamp: now_ms(),
            direction: Direction::Rx,
            data,
            raw: None,
            frames,
        }
    }

    pub fn outbound(data: String, raw: Vec<u8>) -> Self {
        Self {
            timestamp: now_ms(),
            direction: Direction::Tx,
            data,
            raw: Some(raw),
            frames: Vec::new(),
        }
    }
}

/// Bounded per-channel history of captured lines.
pub struct CaptureStore {
    channels: Mutex<HashMap<String, VecDeque<CapturedLine>>>,
    max_entries: usize,
}

impl CaptureStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    pub fn push(&self, channel: &str, line: CapturedLine) {
        let mut channels = self.channels.lock();
        let entries = channels.entry(channel.to_string()).or_default();
        entries.push_back(line);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// Copy of the channel's history, oldest first.
    pub fn snapshot(&self, channel: &str) -> Vec<CapturedLine> {
        self.channels
            .lock()
            .get(channel)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, channel: &str) -> usize {
        self.channels.lock().get(channel).map_or(0, VecDeque::len)
    }

    pub fn clear(&self, channel: &str) {
        self.channels.lock().remove(channel);
    }
}
