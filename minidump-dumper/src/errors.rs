// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Errors produced while introspecting a process or a core file.
//!
//! Absence (a section that doesn't exist, a module without an identifier, an
//! address that isn't mapped) is reported with `Option`. These types are for
//! failures that leave no usable partial result.

/// Errors encountered while enumerating memory mappings.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MapsError {
    #[error("Failed to read the memory map listing")]
    MapsUnreadable,
    #[error("The memory map listing contained no mappings")]
    NoMappings,
}

impl MapsError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            MapsError::MapsUnreadable => "MapsUnreadable",
            MapsError::NoMappings => "NoMappings",
        }
    }
}

/// Errors encountered while reading a core file.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Failed to open or map the core file")]
    CoreUnreadable,
    #[error("Not an ELF file")]
    NotElf,
    #[error("ELF file is not a core file (e_type {0})")]
    NotCore(u16),
    #[error("Unsupported architecture (e_machine {0})")]
    UnsupportedArchitecture(u16),
    #[error("PT_NOTE not found")]
    MissingNotes,
    #[error("Malformed note of type {0:#x}")]
    MalformedNote(u32),
    #[error("Unexpected NT_PRSTATUS size: expected {expected} bytes, found {actual} bytes")]
    PrStatusSizeMismatch { expected: usize, actual: usize },
    #[error(
        "Unexpected floating point register note size: expected {expected} bytes, found {actual} bytes"
    )]
    FpRegistersSizeMismatch { expected: usize, actual: usize },
    #[error("Floating point registers found before any thread")]
    FpRegistersWithoutThread,
}

impl CoreError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            CoreError::CoreUnreadable => "CoreUnreadable",
            CoreError::NotElf => "NotElf",
            CoreError::NotCore(_) => "NotCore",
            CoreError::UnsupportedArchitecture(_) => "UnsupportedArchitecture",
            CoreError::MissingNotes => "MissingNotes",
            CoreError::MalformedNote(_) => "MalformedNote",
            CoreError::PrStatusSizeMismatch { .. } => "PrStatusSizeMismatch",
            CoreError::FpRegistersSizeMismatch { .. } => "FpRegistersSizeMismatch",
            CoreError::FpRegistersWithoutThread => "FpRegistersWithoutThread",
        }
    }
}

/// Errors reported by a [`LinuxDumper`](crate::LinuxDumper).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DumperError {
    #[error(transparent)]
    Maps(#[from] MapsError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Dumper has not been initialized")]
    NotInitialized,
    #[error("Failed to list the threads of process {0}")]
    ThreadsUnreadable(i32),
    #[error("Failed to read the status of thread {0}")]
    ThreadStatusUnreadable(i32),
    #[error("Failed to read the registers of thread {0}")]
    ThreadRegistersUnreadable(i32),
    #[error("Unsupported architecture")]
    UnsupportedArchitecture,
    #[error("Could not suspend any thread of process {0}")]
    SuspendFailed(i32),
    #[error("Thread index {index} out of bounds, only have {count} threads")]
    ThreadIndexOutOfBounds { index: usize, count: usize },
    #[error("Failed to copy {length} bytes from address {address:#x}")]
    CopyFromProcessFailed { address: u64, length: usize },
}

impl DumperError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            DumperError::Maps(e) => e.name(),
            DumperError::Core(e) => e.name(),
            DumperError::NotInitialized => "NotInitialized",
            DumperError::ThreadsUnreadable(_) => "ThreadsUnreadable",
            DumperError::ThreadStatusUnreadable(_) => "ThreadStatusUnreadable",
            DumperError::ThreadRegistersUnreadable(_) => "ThreadRegistersUnreadable",
            DumperError::UnsupportedArchitecture => "UnsupportedArchitecture",
            DumperError::SuspendFailed(_) => "SuspendFailed",
            DumperError::ThreadIndexOutOfBounds { .. } => "ThreadIndexOutOfBounds",
            DumperError::CopyFromProcessFailed { .. } => "CopyFromProcessFailed",
        }
    }
}
