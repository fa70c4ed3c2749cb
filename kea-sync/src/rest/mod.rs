//! Webhook listener: NetBox change notifications trigger one sync each.

mod handlers;
mod routes;

pub use handlers::{ApiError, AppState, EventData, WebhookEvent};
pub use routes::create_router;
