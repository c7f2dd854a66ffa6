//! Uniform result envelope for asynchronous core operations

use crate::errors::SessionError;
use crate::types::{ConnectionState, ProgressState};

/// What every engine and coordinator operation reports
///
/// `Status` is a progress marker without payload. `Outcome` is an
/// intermediate or terminal result; a failed outcome carries the error that
/// caused it instead of propagating it to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult<T> {
    Status(ProgressState),
    Outcome {
        state: ConnectionState,
        data: Option<T>,
        error: Option<SessionError>,
    },
}

impl<T> OperationResult<T> {
    /// Successful outcome, with or without payload
    pub fn outcome(state: ConnectionState, data: Option<T>) -> Self {
        OperationResult::Outcome {
            state,
            data,
            error: None,
        }
    }

    /// Failed outcome carrying `ConnectionState::Failed`
    pub fn failed(error: SessionError) -> Self {
        Self::rejected(ConnectionState::Failed, error)
    }

    /// Failed outcome that leaves the connection state as given
    pub fn rejected(state: ConnectionState, error: SessionError) -> Self {
        OperationResult::Outcome {
            state,
            data: None,
            error: Some(error),
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self, OperationResult::Status(_))
    }

    /// Connection state of an outcome
    pub fn state(&self) -> Option<ConnectionState> {
        match self {
            OperationResult::Status(_) => None,
            OperationResult::Outcome { state, .. } => Some(*state),
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            OperationResult::Outcome { data, .. } => data.as_ref(),
            OperationResult::Status(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            OperationResult::Outcome { error, .. } => error.as_ref(),
            OperationResult::Status(_) => None,
        }
    }

    /// Consume the envelope and keep the payload
    pub fn into_data(self) -> Option<T> {
        match self {
            OperationResult::Outcome { data, .. } => data,
            OperationResult::Status(_) => None,
        }
    }

    /// Transform the payload, keeping state and error
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        match self {
            OperationResult::Status(progress) => OperationResult::Status(progress),
            OperationResult::Outcome { state, data, error } => OperationResult::Outcome {
                state,
                data: data.map(f),
                error,
            },
        }
    }
}
