/// Client for the Sense authentication endpoints.
pub mod apicall;
/// Credentials, feed frames and the realtime sample.
pub mod model;
