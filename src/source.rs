// src/source.rs
//
// Frame sources. A source hands out timestamped images on demand; the
// capture worker assigns sequence numbers and feeds the frame buffer.

use crate::types::ImagePayload;
use anyhow::{ensure, Result};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "ppm"];

/// A frame before it has been given a sequence number.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub timestamp_ms: f64,
    pub image: ImagePayload,
}

#[derive(Debug, Clone)]
pub enum SourcePoll {
    Frame(SourceFrame),
    /// Temporarily nothing to deliver; reconnecting is the source's job.
    Unavailable(String),
    EndOfStream,
}

pub trait FrameSource: Send {
    fn pull(&mut self) -> SourcePoll;

    fn name(&self) -> &str;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn pull(&mut self) -> SourcePoll {
        (**self).pull()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ============================================================================
// IMAGE DIRECTORY
// ============================================================================

/// Still images played back in file-name order at a nominal frame rate.
pub struct ImageDirSource {
    name: String,
    files: Vec<PathBuf>,
    next: usize,
    fps: f64,
    realtime: bool,
    started_at: Option<Instant>,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>, fps: f64, realtime: bool) -> Result<Self> {
        let dir = dir.as_ref();
        ensure!(dir.is_dir(), "frame directory {} does not exist", dir.display());
        ensure!(fps > 0.0, "fps must be > 0");

        let files = find_image_files(dir);
        info!("Found {} frame(s) in {}", files.len(), dir.display());

        Ok(Self {
            name: dir.display().to_string(),
            files,
            next: 0,
            fps,
            realtime,
            started_at: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self, timestamp_ms: f64) {
        let started = *self.started_at.get_or_insert_with(Instant::now);
        let due = Duration::from_secs_f64(timestamp_ms / 1000.0);
        let elapsed = started.elapsed();
        if due > elapsed {
            thread::sleep(due - elapsed);
        }
    }
}

impl FrameSource for ImageDirSource {
    fn pull(&mut self) -> SourcePoll {
        let Some(path) = self.files.get(self.next).cloned() else {
            return SourcePoll::EndOfStream;
        };
        let index = self.next;
        self.next += 1;

        let timestamp_ms = index as f64 / self.fps * 1000.0;
        if self.realtime {
            self.pace(timestamp_ms);
        }

        // An unreadable file still occupies its time slot; the detector
        // reports it as an undecodable frame.
        let bytes = fs::read(&path).unwrap_or_else(|e| {
            warn!("Failed to read frame {}: {}", path.display(), e);
            Vec::new()
        });

        SourcePoll::Frame(SourceFrame {
            timestamp_ms,
            image: ImagePayload::Encoded(Arc::new(bytes)),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn find_image_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Scripted source, handy for replaying synthetic frames.
pub struct MemorySource {
    polls: VecDeque<SourcePoll>,
}

impl MemorySource {
    pub fn new(polls: impl IntoIterator<Item = SourcePoll>) -> Self {
        Self {
            polls: polls.into_iter().collect(),
        }
    }

    /// One frame per timestamp, all carrying the same image.
    pub fn from_timestamps(timestamps: &[f64], image: ImagePayload) -> Self {
        Self::new(timestamps.iter().map(|&timestamp_ms| {
            SourcePoll::Frame(SourceFrame {
                timestamp_ms,
                image: image.clone(),
            })
        }))
    }
}

impl FrameSource for MemorySource {
    fn pull(&mut self) -> SourcePoll {
        self.polls.pop_front().unwrap_or(SourcePoll::EndOfStream)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
