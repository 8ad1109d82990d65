pub mod auth_service;
pub mod backend_client;
pub mod signature_service;
pub mod upload_plan;
pub mod upload_service;
pub mod video_service;
