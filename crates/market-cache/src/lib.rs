pub mod cache;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use cache::{CacheEntry, MarketDataCache, RefreshReport};
pub use scheduler::{duration_until_next, CacheScheduler, SchedulerConfig};
