use std::fmt;
use std::path::PathBuf;

use crate::error::ValidationError;
use crate::types::catalog::Catalog;

/// A monotonically assigned identifier, used as FIFO tie-breaker and as the
/// handle into the in-flight table.
///
/// Stamped onto a request only once it is admitted into the in-flight table
/// (see [`crate::router::inflight::InFlightTable::insert`]); it is never
/// compared or dereferenced by pointer/reference identity, per the fix
/// called out in the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNo(pub u64);

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request's priority, 0 (lowest) to 5 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 5;

    pub fn new(value: u32) -> Option<Self> {
        if value <= Self::MAX as u32 {
            Some(Priority(value as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request as decoded off the wire, before admission-time validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Status,
    ProcessFile(ProcessFile),
}

/// The PROCESS_FILE-specific attributes of a request.
///
/// `op_indices` mirrors `ops` one-for-one (duplicates preserved, since a
/// pipeline may use the same transformation more than once) and is resolved
/// against the [`Catalog`] at validation time so the router and sorter never
/// need to re-resolve transformation names by string comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFile {
    pub priority: Priority,
    pub input: PathBuf,
    pub output: PathBuf,
    pub ops: Vec<String>,
    pub op_indices: Vec<usize>,
    pub running: bool,
}

impl ProcessFile {
    /// The distinct (deduplicated) transformation indices this request
    /// occupies a queue in: "for every transformation i that
    /// occurs in R.ops".
    pub fn distinct_op_indices(&self) -> Vec<usize> {
        let mut distinct = self.op_indices.clone();
        distinct.sort_unstable();
        distinct.dedup();
        distinct
    }

    /// Number of occurrences of transformation `index` within this
    /// request's pipeline.
    pub fn occurrences_of(&self, index: usize) -> u32 {
        self.op_indices.iter().filter(|&&i| i == index).count() as u32
    }
}

/// A submitted job, as it exists before it has been assigned a sequence
/// number by the in-flight table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Path the router can open for writing client-visible replies.
    pub reply_path: PathBuf,
    pub kind: RequestKind,
}

impl Request {
    pub fn new_status(reply_path: PathBuf) -> Self {
        Request {
            reply_path,
            kind: RequestKind::Status,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_process_file(
        reply_path: PathBuf,
        priority: Priority,
        input: PathBuf,
        output: PathBuf,
        ops: Vec<String>,
    ) -> Self {
        Request {
            reply_path,
            kind: RequestKind::ProcessFile(ProcessFile {
                priority,
                input,
                output,
                ops,
                op_indices: Vec::new(),
                running: false,
            }),
        }
    }

    /// Validates a PROCESS_FILE request against the catalog and
    /// resolves its operation names into stable catalog indices. STATUS
    /// requests are always valid.
    pub fn validate(mut self, catalog: &Catalog) -> Result<Self, ValidationError> {
        if let RequestKind::ProcessFile(ref mut pf) = self.kind {
            if pf.ops.is_empty() {
                return Err(ValidationError::EmptyOps);
            }

            let mut op_indices = Vec::with_capacity(pf.ops.len());
            for name in &pf.ops {
                let idx = catalog
                    .index_of(name)
                    .ok_or_else(|| ValidationError::UnknownTransformation {
                        name: name.clone(),
                    })?;
                op_indices.push(idx);
            }
            pf.op_indices = op_indices;
        }

        Ok(self)
    }

    pub fn as_process_file(&self) -> Option<&ProcessFile> {
        match &self.kind {
            RequestKind::ProcessFile(pf) => Some(pf),
            RequestKind::Status => None,
        }
    }

    pub fn as_process_file_mut(&mut self) -> Option<&mut ProcessFile> {
        match &mut self.kind {
            RequestKind::ProcessFile(pf) => Some(pf),
            RequestKind::Status => None,
        }
    }
}
