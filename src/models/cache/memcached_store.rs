use crate::models::cache::{KvStore, NAMESPACE, STICKY_MARKER};
use crate::models::error::CacheError;

fn store_err(err: memcache::MemcacheError) -> CacheError {
    CacheError::Store(err.to_string())
}

/// Memcached adapter.
///
/// Memcached cannot enumerate keys, so clearing works by generation:
/// every physical key embeds a generation counter (one for normal
/// entries, one for sticky ones) and a clear bumps the counter, orphaning
/// every previous entry without touching it.
pub struct MemcachedStore {
    client: memcache::Client,
}

impl MemcachedStore {
    /// `url` in `memcache://host:port` form.
    pub fn connect(url: &str) -> Result<Self, CacheError> {
        let client = memcache::connect(url).map_err(store_err)?;
        Ok(Self { client })
    }

    fn generation_key(sticky: bool) -> String {
        if sticky {
            format!("{NAMESPACE}sticky_generation")
        } else {
            format!("{NAMESPACE}generation")
        }
    }

    fn generation(&self, sticky: bool) -> Result<u64, CacheError> {
        let current = self
            .client
            .get::<u64>(&Self::generation_key(sticky))
            .map_err(store_err)?
            .unwrap_or(0);
        Ok(current)
    }

    fn bump_generation(&self, sticky: bool) -> Result<(), CacheError> {
        let key = Self::generation_key(sticky);
        if self.client.increment(&key, 1).is_err() {
            // Counter not there yet; seed it past the implicit zero.
            self.client.set(&key, 1u64, 0).map_err(store_err)?;
        }
        Ok(())
    }

    fn physical(&self, key: &str) -> Result<String, CacheError> {
        let sticky = key.starts_with(STICKY_MARKER);
        let generation = self.generation(sticky)?;
        Ok(format!("{NAMESPACE}g{generation}_{key}"))
    }
}

impl KvStore for MemcachedStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let key = self.physical(key)?;
        self.client.get::<Vec<u8>>(&key).map_err(store_err)
    }

    fn set(
        &mut self,
        key: &str,
        value: &[u8],
        overwrite: bool,
        _sticky: bool,
    ) -> Result<bool, CacheError> {
        let key = self.physical(key)?;
        if overwrite {
            self.client.set(&key, value, 0).map_err(store_err)?;
            Ok(true)
        } else {
            // `add` refuses existing keys; that refusal is the
            // add-if-absent outcome, not a failure.
            Ok(self.client.add(&key, value, 0).is_ok())
        }
    }

    fn clear(&mut self, _prefix: &str, also_sticky: bool) -> Result<(), CacheError> {
        self.bump_generation(false)?;
        if also_sticky {
            self.bump_generation(true)?;
        }
        Ok(())
    }
}
