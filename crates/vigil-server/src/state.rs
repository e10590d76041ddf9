use std::path::PathBuf;

/// Shared application state passed to all route handlers.
///
/// Only the database path is held here: handlers open a fresh store per
/// request inside `spawn_blocking`, and all tunable behavior lives in the
/// settings table so it is re-read on every scheduler invocation.
#[derive(Clone)]
pub struct AppState {
    pub db_path: PathBuf,
}

impl AppState {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_stores_db_path() {
        let state = AppState::new(PathBuf::from("/tmp/vigil.db"));
        assert_eq!(state.db_path, PathBuf::from("/tmp/vigil.db"));
    }
}
