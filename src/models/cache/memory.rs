use hashbrown::HashMap;

use crate::models::cache::{KvStore, NAMESPACE, STICKY_MARKER};
use crate::models::error::CacheError;

/// In-process adapter: a plain map, useful on its own for single-process
/// hosts and as the reference behavior the other adapters mimic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn physical(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }
}

impl KvStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(&Self::physical(key)).cloned())
    }

    fn set(
        &mut self,
        key: &str,
        value: &[u8],
        overwrite: bool,
        _sticky: bool,
    ) -> Result<bool, CacheError> {
        let key = Self::physical(key);
        if !overwrite && self.entries.contains_key(&key) {
            return Ok(false);
        }
        self.entries.insert(key, value.to_vec());
        Ok(true)
    }

    fn clear(&mut self, prefix: &str, also_sticky: bool) -> Result<(), CacheError> {
        let normal = format!("{NAMESPACE}{prefix}");
        let sticky = format!("{NAMESPACE}{STICKY_MARKER}{prefix}");
        self.entries.retain(|key, _| {
            // An empty prefix makes the normal pattern match sticky keys
            // too, so sticky entries are classified first.
            let is_sticky = key
                .strip_prefix(NAMESPACE)
                .is_some_and(|k| k.starts_with(STICKY_MARKER));
            let doomed = if is_sticky {
                also_sticky && key.starts_with(&sticky)
            } else {
                key.starts_with(&normal)
            };
            !doomed
        });
        Ok(())
    }
}
