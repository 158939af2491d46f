use crate::storage::handle::{MapHandle, MapResult};

/// A held key lock.
///
/// Release it with [`KeyLock::release`]. A guard dropped while still held (a
/// panic or a cancelled future between lock and release) schedules the
/// unlock on the current tokio runtime instead.
pub struct KeyLock<M: MapHandle> {
    map: M,
    key: Option<String>,
}

impl<M: MapHandle> KeyLock<M> {
    /// Locks `key` through `map`. When the lock request failed in transit the
    /// node may still have granted it, so an unlock is sent before the error
    /// is returned.
    pub async fn acquire(map: &M, key: &str) -> MapResult<Self> {
        if let Err(e) = map.lock(key).await {
            if e.is_transport() {
                match map.unlock(key).await {
                    Ok(()) => tracing::debug!(
                        "Released key '{}' of map '{}' after failed lock",
                        key,
                        map.name()
                    ),
                    Err(unlock_err) => tracing::debug!(
                        "Unlock of key '{}' of map '{}' after failed lock: {}",
                        key,
                        map.name(),
                        unlock_err
                    ),
                }
            }
            return Err(e);
        }
        tracing::debug!("Locked key '{}' of map '{}'", key, map.name());
        Ok(Self {
            map: map.clone(),
            key: Some(key.to_string()),
        })
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub async fn release(mut self) -> MapResult<()> {
        let Some(key) = self.key.take() else {
            return Ok(());
        };
        self.map.unlock(&key).await?;
        tracing::debug!("Unlocked key '{}' of map '{}'", key, self.map.name());
        Ok(())
    }
}

impl<M: MapHandle> Drop for KeyLock<M> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };

        tracing::warn!(
            "Lock on key '{}' of map '{}' dropped while held, unlocking in background",
            key,
            self.map.name()
        );

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let map = self.map.clone();
                runtime.spawn(async move {
                    if let Err(e) = map.unlock(&key).await {
                        tracing::error!(
                            "Background unlock of key '{}' of map '{}' failed: {}",
                            key,
                            map.name(),
                            e
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    "No runtime to unlock key '{}' of map '{}'; it stays locked",
                    key,
                    self.map.name()
                );
            }
        }
    }
}
