use thiserror::Error;

/// Errors raised by the pure computation stages.
///
/// Data-unavailable conditions (missing price, missing score, failed cost
/// estimate) are deliberately not represented here: they are explicit `None`
/// values that propagate as exclusion or fail-closed classification.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Malformed input rejected before computation: out-of-order history,
    /// negative quantities, a sell with no proceeds.
    #[error("validation error: {0}")]
    Validation(String),

    /// Fatal data-integrity violation: lot conservation broken or a disposal
    /// exceeding available quantity. Processing for the affected owner must
    /// halt rather than produce a plausible-looking wrong answer.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// An external collaborator failed in a way that prevents the whole
    /// pass (e.g. the history source itself is down).
    #[error("provider error: {0}")]
    Provider(String),
}
