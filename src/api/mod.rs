pub mod handlers;
pub mod server;

pub use handlers::{ApiError, AppState};
pub use server::{assemble, build_router, run_server};
