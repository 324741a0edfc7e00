//! # Error Handling for the Karel VM
//!
//! Three separate taxonomies, matching the three places a call into this
//! crate can fail:
//!
//! - [`CompileError`] — the compiler rejected the source.
//! - [`RuntimeError`] — a run was entered but a dispatched instruction
//!   failed (or the run was cancelled).
//! - [`ResultCode`] — the single enum that crosses the embedding boundary
//!   (see the facade), with both of the above folded into it.

use std::fmt;

/// Errors produced while compiling Karel source into bytecode.
///
/// All are fatal to the `load` call that triggered them: the facade leaves
/// no partial bytecode or symbol table behind on any of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A condition line used a prefix other than `IS` / `ISNOT`.
    UnknownConditionPrefix(String),
    /// A condition line's predicate wasn't one of the known sense words.
    UnknownCondition(String),
    /// A `REPEAT` count failed to parse as an integer.
    RepeatCountInvalid(String),
    /// A `REPEAT` count parsed but doesn't fit in 16 bits.
    RepeatCountTooBig(String),
    /// The same symbol name was defined twice at the top level.
    SymbolAlreadyDefined(String),
    /// A scope (definition, `IF`, `UNTIL`, `REPEAT`) was never closed with `END`.
    UnexpectedEndOfFile,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnknownConditionPrefix(tok) => {
                write!(f, "UnknownConditionPrefix: expected IS or ISNOT, found '{}'", tok)
            }
            CompileError::UnknownCondition(tok) => {
                write!(f, "UnknownCondition: '{}' is not a recognized sense", tok)
            }
            CompileError::RepeatCountInvalid(tok) => {
                write!(f, "RepeatCountInvalid: '{}' is not a valid repeat count", tok)
            }
            CompileError::RepeatCountTooBig(tok) => {
                write!(f, "RepeatCountTooBig: '{}' does not fit in 16 bits", tok)
            }
            CompileError::SymbolAlreadyDefined(name) => {
                write!(f, "SymbolAlreadyDefined: '{}' is defined more than once", name)
            }
            CompileError::UnexpectedEndOfFile => {
                write!(f, "UnexpectedEndOfFile: a scope was never closed with END")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Errors produced while a compiled symbol is running.
///
/// Unlike [`CompileError`], the world is left exactly as it stood at the
/// failing instruction: a host debugging a program wants to see where
/// Karel got stuck, not a rolled-back world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// `STEP` would leave the grid or walk into a wall.
    StepOutOfBounds,
    /// `PICK` on a square already at zero flags.
    PickupZeroFlags,
    /// `PLACE` on a square already at the maximum of eight flags.
    PlaceMaxFlags,
    /// Execution reached an explicit `STOP`.
    StopEncountered,
    /// The host cancelled the run via `short_circuit`.
    Cancelled,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::StepOutOfBounds => {
                write!(f, "StepOutOfBounds: STEP would leave the grid or hit a wall")
            }
            RuntimeError::PickupZeroFlags => {
                write!(f, "PickupZeroFlags: no flag to pick up on this square")
            }
            RuntimeError::PlaceMaxFlags => {
                write!(f, "PlaceMaxFlags: this square already holds the maximum of flags")
            }
            RuntimeError::StopEncountered => {
                write!(f, "StopEncountered: execution reached a STOP instruction")
            }
            RuntimeError::Cancelled => {
                write!(f, "Cancelled: the run was short-circuited by the host")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The result code that crosses the embedding boundary.
///
/// Every facade operation resolves to one of these. `CompileError` and
/// `RuntimeError` both convert into it; the host never needs to match on
/// the richer internal enums unless it wants the detail.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success = 0,
    UnknownError = 1,
    /// Reserved for an embedding shim that rejects use of an uninitialized
    /// singleton; this crate's handle-based `Vm` has no such state to reject,
    /// so nothing here produces this code.
    NotInitialized = 2,
    FileNotFound = 3,
    CompilationError = 4,
    StateNotValid = 5,
    SymbolNotFound = 6,
    StepOutOfBounds = 7,
    PickupZeroFlags = 8,
    PlaceMaxFlags = 9,
    StopEncountered = 10,
    InProgress = 11,
}

impl ResultCode {
    /// Decode a value previously produced by `as u8`. Used to load the
    /// facade's atomic status cell back into a `ResultCode`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ResultCode::Success,
            1 => ResultCode::UnknownError,
            2 => ResultCode::NotInitialized,
            3 => ResultCode::FileNotFound,
            4 => ResultCode::CompilationError,
            5 => ResultCode::StateNotValid,
            6 => ResultCode::SymbolNotFound,
            7 => ResultCode::StepOutOfBounds,
            8 => ResultCode::PickupZeroFlags,
            9 => ResultCode::PlaceMaxFlags,
            10 => ResultCode::StopEncountered,
            _ => ResultCode::InProgress,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for ResultCode {}

impl From<RuntimeError> for ResultCode {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::StepOutOfBounds => ResultCode::StepOutOfBounds,
            RuntimeError::PickupZeroFlags => ResultCode::PickupZeroFlags,
            RuntimeError::PlaceMaxFlags => ResultCode::PlaceMaxFlags,
            RuntimeError::StopEncountered => ResultCode::StopEncountered,
            // Cancellation is not a failure from the host's point of view;
            // the run simply stopped early. See the facade's status handling.
            RuntimeError::Cancelled => ResultCode::Success,
        }
    }
}

impl From<CompileError> for ResultCode {
    fn from(_err: CompileError) -> Self {
        ResultCode::CompilationError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_maps_to_matching_result_code() {
        assert_eq!(ResultCode::from(RuntimeError::StepOutOfBounds), ResultCode::StepOutOfBounds);
        assert_eq!(ResultCode::from(RuntimeError::PickupZeroFlags), ResultCode::PickupZeroFlags);
        assert_eq!(ResultCode::from(RuntimeError::PlaceMaxFlags), ResultCode::PlaceMaxFlags);
        assert_eq!(ResultCode::from(RuntimeError::StopEncountered), ResultCode::StopEncountered);
    }

    #[test]
    fn cancellation_maps_to_success() {
        assert_eq!(ResultCode::from(RuntimeError::Cancelled), ResultCode::Success);
    }

    #[test]
    fn compile_error_maps_to_compilation_error() {
        assert_eq!(
            ResultCode::from(CompileError::UnexpectedEndOfFile),
            ResultCode::CompilationError
        );
    }

    #[test]
    fn display_messages_are_non_empty() {
        assert!(!CompileError::UnexpectedEndOfFile.to_string().is_empty());
        assert!(!RuntimeError::StopEncountered.to_string().is_empty());
        assert!(!ResultCode::Success.to_string().is_empty());
    }
}
