mod lru;

pub(crate) use lru::{CachedValue, TtlCache};
