// Author: Lukas Bower
//! Fixed-capacity registration trace shared by the thread-state database and host tooling.
#![no_std]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use core::fmt::{self, Write};
use heapless::{Deque, String as HeaplessString, Vec as HeaplessVec};

/// Default number of registrations retained by the trace ring.
pub const TRACE_MAX_ENTRIES: usize = 8;
/// Maximum encoded length of a JSONL trace line.
pub const JSON_LINE_CAPACITY: usize = 256;

/// Heapless buffer used when serialising a trace record to JSONL.
pub type JsonLine = HeaplessString<JSON_LINE_CAPACITY>;

/// Errors encountered while rendering trace records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceError {
    /// JSON output exceeded the fixed-capacity buffer.
    JsonOverflow,
}

/// One registration captured by the ring: who entered, from where, with which flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    sequence: u32,
    kind: &'static str,
    flags: u32,
    file: &'static str,
    line: u32,
}

impl TraceRecord {
    /// Construct a trace record for a registration performed at `file:line`.
    #[must_use]
    pub const fn new(
        sequence: u32,
        kind: &'static str,
        flags: u32,
        file: &'static str,
        line: u32,
    ) -> Self {
        Self {
            sequence,
            kind,
            flags,
            file,
            line,
        }
    }

    /// Sequence number of the registered node.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Label of the context kind that registered.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Raw entry flags supplied by the caller.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Source file of the registering call site.
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// Source line of the registering call site.
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// Serialise the record to JSONL form.
    pub fn to_json_line(&self) -> Result<JsonLine, TraceError> {
        let mut line = JsonLine::new();
        push_fmt(
            &mut line,
            format_args!(
                "{{\"seq\":{},\"kind\":\"{}\",\"flags\":\"0x{:x}\",\"site\":\"",
                self.sequence, self.kind, self.flags
            ),
        )?;
        append_json_string(&mut line, self.file)?;
        push_fmt(&mut line, format_args!(":{}\"}}", self.line))?;
        Ok(line)
    }
}

/// Overwrite-oldest ring of registration records.
#[derive(Debug)]
pub struct TraceRing<const N: usize = TRACE_MAX_ENTRIES> {
    records: Deque<TraceRecord, N>,
    recorded: u64,
}

impl<const N: usize> Default for TraceRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TraceRing<N> {
    /// Create an empty ring.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Deque::new(),
            recorded: 0,
        }
    }

    /// Append a record, evicting the oldest one when the ring is full.
    pub fn push(&mut self, record: TraceRecord) {
        if N == 0 {
            return;
        }
        if self.records.is_full() {
            let _ = self.records.pop_front();
        }
        let _ = self.records.push_back(record);
        self.recorded = self.recorded.saturating_add(1);
    }

    /// Number of records currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when nothing has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total number of records ever pushed, including evicted ones.
    #[must_use]
    pub const fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Drop every retained record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Copy the retained records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> HeaplessVec<TraceRecord, N> {
        let mut out = HeaplessVec::new();
        for record in self.records.iter() {
            if out.push(*record).is_err() {
                break;
            }
        }
        out
    }
}

fn push_fmt(buffer: &mut JsonLine, args: fmt::Arguments<'_>) -> Result<(), TraceError> {
    buffer.write_fmt(args).map_err(|_| TraceError::JsonOverflow)
}

fn push_str(buffer: &mut JsonLine, value: &str) -> Result<(), TraceError> {
    buffer.push_str(value).map_err(|_| TraceError::JsonOverflow)
}

fn push_char(buffer: &mut JsonLine, ch: char) -> Result<(), TraceError> {
    buffer.push(ch).map_err(|_| TraceError::JsonOverflow)
}

fn append_json_string(buffer: &mut JsonLine, value: &str) -> Result<(), TraceError> {
    for ch in value.chars() {
        match ch {
            '"' => push_str(buffer, "\\\"")?,
            '\\' => push_str(buffer, "\\\\")?,
            other if other.is_control() => {
                push_str(buffer, "\\u")?;
                push_fmt(buffer, format_args!("{:04x}", other as u32))?;
            }
            other => push_char(buffer, other)?,
        }
    }
    Ok(())
}
