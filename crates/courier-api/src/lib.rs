pub mod auth;
pub mod conversations;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use courier_db::Database;
use courier_gateway::coordinator::Coordinator;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub coordinator: Coordinator,
}
