//! The Reducer trait - core abstraction for business logic
//!
//! Reducers are pure functions: `(State, Action, Environment) → Result<Effects>`.
//! They validate the action, update state in place and return descriptions of
//! the writes to perform. They never perform I/O; the caller executes the
//! effects (see [`crate::manager::BookingManager`]).

use smallvec::SmallVec;

/// The Reducer trait
///
/// # Type Parameters
///
/// - `State`: The domain state this reducer operates on
/// - `Action`: The action type this reducer processes
/// - `Environment`: The injected dependencies this reducer needs
/// - `Effect`: Descriptions of side effects produced by a successful action
/// - `Error`: Rejection of an action by a business rule
///
/// A rejected action must leave `state` untouched.
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Side effect descriptions returned by the reducer
    type Effect;

    /// Business rule violations
    type Error;

    /// Reduce an action into state changes and effects
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when the action violates a business rule. State
    /// is left unchanged in that case.
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<SmallVec<[Self::Effect; 4]>, Self::Error>;
}
