use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc::Receiver,
    time::{SystemTime, UNIX_EPOCH},
};

use itertools::Itertools;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::TeledashError;
use crate::protocol::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameDirection {
    Inbound,
    Outbound,
}

/// One line of a session transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub direction: FrameDirection,
    /// Milliseconds since the unix epoch.
    pub timestamp_ms: u64,
    pub frame: Frame,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl TranscriptEntry {
    pub fn inbound(frame: Frame) -> Self {
        Self {
            direction: FrameDirection::Inbound,
            timestamp_ms: now_ms(),
            frame,
        }
    }

    pub fn outbound(frame: Frame) -> Self {
        Self {
            direction: FrameDirection::Outbound,
            timestamp_ms: now_ms(),
            frame,
        }
    }
}

/// Default transcript file name for a session started now.
pub fn transcript_file_name() -> String {
    format!("teledash-{}.jsonl", now_ms())
}

/// Writes every entry received on `transcript_receiver` to `file`, one JSON object per
/// line, until all senders are gone.
pub fn write_transcript(
    file: &PathBuf,
    transcript_receiver: Receiver<TranscriptEntry>,
) -> Result<(), TeledashError> {
    let transcript_file =
        File::create(file).map_err(|e| TeledashError::TranscriptWriterError { source: e })?;
    let mut transcript_writer = BufWriter::new(transcript_file);
    for entry in &transcript_receiver {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                error!("Could not serialize transcript entry: {}", e);
                continue;
            }
        };
        writeln!(transcript_writer, "{}", line)
            .map_err(|e| TeledashError::TranscriptWriterError { source: e })?;
    }
    transcript_writer
        .flush()
        .map_err(|e| TeledashError::TranscriptWriterError { source: e })?;
    info!("Transcript written to {:?}", file);
    Ok(())
}

pub fn load_transcript(source_file: &Path) -> Result<Vec<TranscriptEntry>, TeledashError> {
    serde_jsonlines::json_lines(source_file)
        .map_err(|e| TeledashError::TranscriptLoaderError { source: e })?
        .collect::<Result<Vec<TranscriptEntry>, std::io::Error>>()
        .map_err(|e| TeledashError::TranscriptLoaderError { source: e })
}

/// The frames the backend sent, in the order they were received.
pub fn inbound_frames(entries: &[TranscriptEntry]) -> Vec<Frame> {
    entries
        .iter()
        .filter(|entry| entry.direction == FrameDirection::Inbound)
        .sorted_by_key(|entry| entry.timestamp_ms)
        .map(|entry| entry.frame.clone())
        .collect()
}
