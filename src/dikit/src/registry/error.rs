use std::fmt::{Display, Formatter, Result as FmtResult};

use snafu::prelude::*;
use snafu::Backtrace;

use crate::component::BoxError;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum RegistryError {
    #[snafu(display("the component {name} is already registered"))]
    #[non_exhaustive]
    DuplicateName { name: String },
    #[snafu(display("could not find the component {name}"))]
    #[non_exhaustive]
    NotFound { name: String },
    #[snafu(display("the component {name} holds a {found} rather than a {expected}"))]
    #[non_exhaustive]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[snafu(display("unable to build the component {name}: {source}"))]
    #[non_exhaustive]
    Build { name: String, source: BoxError },
    #[snafu(display("recovered from a panic while building the component {name}: {payload}"))]
    #[non_exhaustive]
    BuildPanic {
        name: String,
        payload: String,
        backtrace: Backtrace,
    },
    #[snafu(display("the component {name} can not be started"))]
    #[non_exhaustive]
    NotStartable { name: String },
    #[snafu(display("unable to start the component {name}: {source}"))]
    #[non_exhaustive]
    Start { name: String, source: BoxError },
    #[snafu(display("unable to stop the component {name}: {source}"))]
    #[non_exhaustive]
    StopFailure { name: String, source: BoxError },
    #[snafu(display("unable to close the component {name}: {source}"))]
    #[non_exhaustive]
    CloseFailure { name: String, source: BoxError },
    #[snafu(display(
        "{operation} failed for {} component(s):\n{}",
        errors.len(),
        AggregatedDisplayer::new(errors)
    ))]
    #[non_exhaustive]
    Teardown {
        operation: &'static str,
        errors: Vec<RegistryError>,
    },
}

impl RegistryError {
    /// Returns the name of the component the error is about, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::DuplicateName { name }
            | Self::NotFound { name }
            | Self::TypeMismatch { name, .. }
            | Self::Build { name, .. }
            | Self::BuildPanic { name, .. }
            | Self::NotStartable { name }
            | Self::Start { name, .. }
            | Self::StopFailure { name, .. }
            | Self::CloseFailure { name, .. } => Some(name),
            Self::Teardown { .. } => None,
        }
    }

    /// Returns the individual failures of a teardown, or an empty slice.
    pub fn failures(&self) -> &[RegistryError] {
        match self {
            Self::Teardown { errors, .. } => errors,
            _ => &[],
        }
    }
}

/// Folds the failures of one teardown pass into a single result.
pub(crate) fn aggregate(
    operation: &'static str,
    errors: Vec<RegistryError>,
) -> Result<(), RegistryError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RegistryError::Teardown { operation, errors })
    }
}

struct AggregatedDisplayer<'a> {
    errors: &'a [RegistryError],
}

impl<'a> AggregatedDisplayer<'a> {
    fn new(errors: &'a [RegistryError]) -> Self {
        Self { errors }
    }
}

impl Display for AggregatedDisplayer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, error) in self.errors.iter().enumerate() {
            writeln!(f, "{:4}: {}", i + 1, error)?;
        }
        Ok(())
    }
}
