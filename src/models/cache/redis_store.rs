use redis::Commands;

use crate::models::cache::{KvStore, NAMESPACE, STICKY_MARKER};
use crate::models::error::CacheError;

fn store_err(err: redis::RedisError) -> CacheError {
    CacheError::Store(err.to_string())
}

/// Redis adapter over one synchronous connection.
///
/// Clearing walks the keyspace with `SCAN MATCH` rather than `KEYS`, so
/// a big shared instance is never blocked on our account.
pub struct RedisStore {
    conn: redis::Connection,
}

impl RedisStore {
    pub fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = client.get_connection().map_err(store_err)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: redis::Connection) -> Self {
        Self { conn }
    }

    fn physical(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }

    fn matching_keys(&mut self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let keys = self
            .conn
            .scan_match::<_, String>(pattern)
            .map_err(store_err)?
            .collect();
        Ok(keys)
    }
}

impl KvStore for RedisStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.conn.get(Self::physical(key)).map_err(store_err)
    }

    fn set(
        &mut self,
        key: &str,
        value: &[u8],
        overwrite: bool,
        _sticky: bool,
    ) -> Result<bool, CacheError> {
        let key = Self::physical(key);
        if overwrite {
            let _: () = self.conn.set(key, value).map_err(store_err)?;
            Ok(true)
        } else {
            self.conn.set_nx(key, value).map_err(store_err)
        }
    }

    fn clear(&mut self, prefix: &str, also_sticky: bool) -> Result<(), CacheError> {
        let mut doomed = Vec::new();
        for key in self.matching_keys(&format!("{NAMESPACE}{prefix}*"))? {
            let is_sticky = key
                .strip_prefix(NAMESPACE)
                .is_some_and(|k| k.starts_with(STICKY_MARKER));
            if !is_sticky {
                doomed.push(key);
            }
        }
        if also_sticky {
            doomed.extend(self.matching_keys(&format!("{NAMESPACE}{STICKY_MARKER}{prefix}*"))?);
        }
        if !doomed.is_empty() {
            let _: () = self.conn.del(doomed).map_err(store_err)?;
        }
        Ok(())
    }
}
