use crate::coach::Coach;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single coach instance (one session at a time)
    pub coach: Coach,
}

impl AppState {
    pub fn new(coach: Coach) -> Self {
        Self { coach }
    }
}
