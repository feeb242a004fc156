use chrono::Utc;
use kouri_core::{KouriError, Result};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::sanitize::{clean_memory_content, clean_memory_key};

/// Called with `(key, value)` after every write.
pub type MemoryHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Resets the reentrancy flag even if a hook panics.
struct HookGuard;

impl HookGuard {
    fn enter() -> Option<Self> {
        IN_HOOK.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(HookGuard)
            }
        })
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        IN_HOOK.with(|flag| flag.set(false));
    }
}

/// Durable key→value facts in a JSON object file.
pub struct MemoryStore {
    path: PathBuf,
    facts: Mutex<BTreeMap<String, String>>,
    hooks: RwLock<Vec<MemoryHook>>,
}

impl MemoryStore {
    /// Open (or create) the fact file. An unreadable file is moved aside and
    /// the store starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let facts = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                    Ok(facts) => facts,
                    Err(e) => {
                        let aside = path.with_extension(format!("corrupt-{}", Utc::now().timestamp()));
                        warn!(error = %e, path = %path.display(), moved_to = %aside.display(), "fact file unreadable, starting empty");
                        std::fs::rename(&path, &aside)?;
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };

        let store = Self {
            path,
            facts: Mutex::new(facts),
            hooks: RwLock::new(Vec::new()),
        };
        if !store.path.exists() {
            store.save()?;
        }
        info!(path = %store.path.display(), facts = store.len(), "memory store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.facts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.facts.lock().get(key).cloned()
    }

    /// Every fact as a `"key:value"` document.
    pub fn get_key_value_pairs(&self) -> Vec<String> {
        self.facts
            .lock()
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect()
    }

    /// Register a hook run after every write. Hooks run in registration order.
    pub fn add_memory_hook(&self, hook: MemoryHook) {
        self.hooks.write().push(hook);
    }

    /// Write a fact, persist, then run the hooks. A write made from inside a
    /// hook is persisted but does not run the hooks again.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut facts = self.facts.lock();
            facts.insert(key.to_string(), value.to_string());
            self.write_file(&facts)?;
        }
        debug!(key, "fact stored");

        let Some(_guard) = HookGuard::enter() else {
            debug!(key, "write from inside a memory hook, hooks skipped");
            return Ok(());
        };
        let hooks = self.hooks.read().clone();
        for hook in &hooks {
            hook(key, value);
        }
        Ok(())
    }

    /// Sanitize and store a fact unless the key or the value is already known.
    /// Returns whether anything was written.
    pub fn remember(&self, key: &str, value: &str) -> Result<bool> {
        let key = clean_memory_key(key);
        let value = clean_memory_content(value);
        if key.is_empty() || value.trim().is_empty() {
            return Ok(false);
        }
        {
            let facts = self.facts.lock();
            if facts.contains_key(&key) || facts.values().any(|v| *v == value) {
                debug!(key = %key, "duplicate fact skipped");
                return Ok(false);
            }
        }
        self.set(&key, &value)?;
        Ok(true)
    }

    pub fn save(&self) -> Result<()> {
        let facts = self.facts.lock();
        self.write_file(&facts)
    }

    pub fn clear(&self) -> Result<()> {
        let mut facts = self.facts.lock();
        facts.clear();
        self.write_file(&facts)
    }

    fn write_file(&self, facts: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(facts)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| KouriError::Memory(format!("failed to replace {}: {}", self.path.display(), e)))
    }
}
