mod account;
mod client;
mod resources;

pub use account::{AccountApi, Profile, RemoteProfile, StatusResponse};
pub use client::{ApiClient, ApiError, ApiResult};
pub use resources::{ActiveSnapAction, Tool};
