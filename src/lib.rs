pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod state;

use std::sync::Arc;

pub fn build_state() -> anyhow::Result<state::AppState> {
    let roster = state::StaticRoster::from_env().unwrap_or_default();
    let local_state_path = std::env::var("LOCAL_STATE_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| Some(format!("{}/local_state.json", env!("CARGO_MANIFEST_DIR"))));
    Ok(state::AppState::new(Arc::new(roster), local_state_path))
}
