/// Correlation context for a request.
///
/// Carries the caller-supplied `x-correlation-id`, if any, into command
/// handlers so it can be stored on the appended event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationContext {
    correlation_id: Option<String>,
}

impl CorrelationContext {
    pub fn new(correlation_id: Option<String>) -> Self {
        Self { correlation_id }
    }

    pub fn into_inner(self) -> Option<String> {
        self.correlation_id
    }
}
