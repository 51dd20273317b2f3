// Network origin abstraction: the HTTP backend and the trait the rest of the crate uses.

pub mod http_origin;
pub mod traits;
