//! Engine errors.

use trellis_store::StoreError;
use trellis_workflow::DefinitionError;

/// Errors surfaced by the engine's outward-facing operations.
///
/// Step action failures never appear here: the runner handles them per the
/// step's on-error policy and records the outcome on the execution instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// A definition failed validation at save/activate time.
  #[error(transparent)]
  Definition(#[from] DefinitionError),

  /// The store failed.
  #[error(transparent)]
  Store(#[from] StoreError),
}
