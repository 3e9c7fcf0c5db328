mod auth;
mod internal;
mod metrics;
mod scope_auth;
mod tenant;

pub use auth::{operator_auth_middleware, Operator};
pub use internal::{internal_api_key_middleware, INTERNAL_API_KEY_HEADER};
pub use metrics::metrics_middleware;
pub use scope_auth::{has_scope, require_scope, MANAGEMENT_SCOPE};
pub use tenant::TenantScope;
