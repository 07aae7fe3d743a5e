//! Error types for scene setup, runs and jobs.
//!
//! Every error here is `Clone` so a job's terminal error can be kept in its
//! status snapshot and handed to any number of observers. Non-clonable
//! causes are held behind `Arc`.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use kernel::{ConfigError, GeometryError, StepError};

use crate::retry::RetryExhausted;

/// Failure while loading or assembling a scene. Reported before any step.
#[derive(Debug, Clone)]
pub enum SetupError {
    /// A file could not be read.
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: Arc<io::Error>,
    },
    /// Scene JSON did not parse.
    Parse(String),
    /// Scene parsed but is inconsistent.
    Invalid(String),
    /// A source names a material the scene does not define.
    UnknownMaterial {
        /// Index of the offending source.
        source_index: usize,
        /// Material name as written.
        name: String,
    },
    /// STL file could not be parsed.
    Stl {
        /// File involved.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// Boundary mesh rejected.
    Geometry(GeometryError),
    /// Kernel configuration rejected (timestep, materials, sources).
    Config(ConfigError),
}

impl SetupError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SetupError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// Failure that terminates a run after it started.
#[derive(Debug, Clone)]
pub enum RunError {
    /// Numerical failure inside the kernel.
    Step(StepError),
    /// Trajectory output kept failing.
    Storage {
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        source: Arc<io::Error>,
    },
}

impl From<RetryExhausted<io::Error>> for RunError {
    fn from(e: RetryExhausted<io::Error>) -> Self {
        RunError::Storage {
            attempts: e.attempts,
            source: Arc::new(e.last),
        }
    }
}

/// Failure of a submitted job.
#[derive(Debug, Clone)]
pub enum JobError {
    /// Not enough memory for the requested scale. Never retried.
    ResourceExhausted {
        /// Peak sphere count of the scene.
        requested: usize,
        /// Largest sphere count that fits the budget.
        suggested_max: usize,
    },
    /// The worker pool would not accept the job.
    Dispatch {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        message: String,
    },
    /// Building the kernel failed.
    Setup(SetupError),
    /// The run itself failed.
    Run(RunError),
    /// The worker running the job panicked.
    WorkerPanic(String),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read {}: {source}", path.display()),
            Self::Parse(msg) => write!(f, "failed to parse scene: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid scene: {msg}"),
            Self::UnknownMaterial { source_index, name } => {
                write!(f, "source {source_index} uses unknown material {name:?}")
            }
            Self::Stl { path, message } => write!(f, "failed to parse STL {}: {message}", path.display()),
            Self::Geometry(e) => e.fmt(f),
            Self::Config(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<GeometryError> for SetupError {
    fn from(e: GeometryError) -> Self {
        SetupError::Geometry(e)
    }
}

impl From<ConfigError> for SetupError {
    fn from(e: ConfigError) -> Self {
        SetupError::Config(e)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(e) => e.fmt(f),
            Self::Storage { attempts, source } => {
                write!(f, "trajectory storage failed after {attempts} attempts: {source}")
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(source.as_ref()),
            Self::Step(_) => None,
        }
    }
}

impl From<StepError> for RunError {
    fn from(e: StepError) -> Self {
        RunError::Step(e)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted {
                requested,
                suggested_max,
            } => write!(
                f,
                "scene needs {requested} spheres but the memory budget allows at most {suggested_max}"
            ),
            Self::Dispatch { attempts, message } => {
                write!(f, "job dispatch failed after {attempts} attempts: {message}")
            }
            Self::Setup(e) => e.fmt(f),
            Self::Run(e) => e.fmt(f),
            Self::WorkerPanic(msg) => write!(f, "worker panicked: {msg}"),
        }
    }
}

impl std::error::Error for JobError {}

impl From<SetupError> for JobError {
    fn from(e: SetupError) -> Self {
        JobError::Setup(e)
    }
}

impl From<RunError> for JobError {
    fn from(e: RunError) -> Self {
        JobError::Run(e)
    }
}
