pub mod adapters;
pub mod cache;
pub mod clock;
pub mod cwms;
pub mod fetcher;
pub mod freshness;
pub mod nws;
pub mod prefetch;
pub mod revalidate;
pub mod scheduler;
pub mod sources;
#[cfg(test)]
pub mod testing;
pub mod trend;
