pub mod auth_handlers;
pub mod health_handlers;
pub mod session_handlers;
pub mod signature_handlers;
pub mod task_handlers;
pub mod upload_handlers;
