use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}
