pub mod fetcher;
pub mod http;
pub mod normalize;

pub use fetcher::{ResolveError, ResourceFetcher};
pub use http::{FetchOptions, HttpFetcher};
pub use normalize::normalize;
