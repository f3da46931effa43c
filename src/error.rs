use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor unavailable on channel {channel}: {source}")]
    Unavailable {
        channel: u8,
        #[source]
        source: io::Error,
    },

    #[error("sensor read on channel {channel} took {elapsed_ms} ms (limit {limit_ms} ms)")]
    Timeout {
        channel: u8,
        elapsed_ms: u64,
        limit_ms: u64,
    },

    #[error("garbled reading on channel {channel}: {text:?}")]
    Garbled { channel: u8, text: String },
}

impl SensorError {
    pub fn channel(&self) -> u8 {
        match self {
            SensorError::Unavailable { channel, .. }
            | SensorError::Timeout { channel, .. }
            | SensorError::Garbled { channel, .. } => *channel,
        }
    }
}
