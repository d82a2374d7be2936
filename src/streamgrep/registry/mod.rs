/*!
# Type Registry

Derives and caches per-record structural identity: the channel-name /
type-name / schema-hash triple ([`ChannelKey`]), the raw schema text and its
field map.

Registrations live in an arena of generation-checked slots. Each root record
gets a [`RegistryHandle`] on registration; nested records registered under a
root are linked to it and evicted together. Entries expire after a fixed
lifetime via an opportunistic sweep, or immediately on [`TypeRegistry::discard`]
when the window slot holding the record is dropped.
*/

pub mod schema;

use crate::streamgrep::model::Record;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Identity of one logical record stream: channel name, type name and
/// schema hash. Two records on the same channel with different types or
/// schema hashes are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Channel name, like "/robot/odometry"
    pub channel: String,
    /// Record type name, like "nav/Odometry"
    pub type_name: String,
    /// Hex digest of the type's structural definition
    pub type_hash: String,
}

impl ChannelKey {
    pub fn new(
        channel: impl Into<String>,
        type_name: impl Into<String>,
        type_hash: impl Into<String>,
    ) -> Self {
        ChannelKey {
            channel: channel.into(),
            type_name: type_name.into(),
            type_hash: type_hash.into(),
        }
    }
}

/// Generation-checked index into the registry arena.
///
/// A handle is invalidated when its slot is evicted or reused; lookups
/// through a stale handle return `None` rather than aliasing a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryHandle {
    index: u32,
    generation: u32,
}

/// Schema information for one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaInfo {
    /// Raw definition text, empty when none was supplied
    pub text: String,
    /// Hex digest of the structural definition
    pub hash: String,
    /// Ordered field name to type name map of the root block
    pub fields: Vec<(String, String)>,
}

#[derive(Debug)]
struct RegistryEntry {
    key: ChannelKey,
    registered_at: Instant,
    children: Vec<RegistryHandle>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<RegistryEntry>,
}

/// Registry of record-type metadata with bounded-lifetime caching.
pub struct TypeRegistry {
    definitions: HashMap<String, String>,
    hashes: HashMap<String, String>,
    field_maps: HashMap<String, Vec<(String, String)>>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    lifetime: Duration,
    last_sweep: Instant,
}

impl TypeRegistry {
    /// Seconds before an entry is dropped by the periodic sweep.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(2);

    pub fn new() -> Self {
        Self::with_lifetime(Self::DEFAULT_LIFETIME)
    }

    pub fn with_lifetime(lifetime: Duration) -> Self {
        TypeRegistry {
            definitions: HashMap::new(),
            hashes: HashMap::new(),
            field_maps: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            lifetime,
            last_sweep: Instant::now(),
        }
    }

    /// Supplies the raw definition text for a type. Hashes and field maps
    /// are computed lazily on first use and memoized.
    pub fn register_type(&mut self, type_name: impl Into<String>, definition: impl Into<String>) {
        let type_name = type_name.into();
        if !self.definitions.contains_key(&type_name) {
            self.definitions.insert(type_name, definition.into());
        }
    }

    /// Returns the memoized structural hash for a type, computing it from
    /// the registered definition text. An unknown type hashes as an empty
    /// definition.
    pub fn type_hash(&mut self, type_name: &str) -> String {
        if let Some(hash) = self.hashes.get(type_name) {
            return hash.clone();
        }
        let text = self.definitions.get(type_name).cloned().unwrap_or_default();
        let hash = schema::schema_hash(type_name, &text);
        self.hashes.insert(type_name.to_string(), hash.clone());
        hash
    }

    /// Derives the channel key for a record arriving on a channel and
    /// registers an arena entry for it, stamped `now`. Triggers an
    /// opportunistic sweep.
    pub fn identify(&mut self, channel: &str, record: &Record, now: Instant) -> (RegistryHandle, ChannelKey) {
        let hash = self.type_hash(&record.type_name);
        let key = ChannelKey::new(channel, record.type_name.clone(), hash);
        let handle = self.allocate(key.clone(), now);
        self.sweep(now);
        (handle, key)
    }

    /// Registers a nested record type under a root entry, linking it for
    /// joint eviction. Returns `None` if the root handle is stale.
    pub fn register_nested(
        &mut self,
        root: RegistryHandle,
        channel: &str,
        type_name: &str,
        now: Instant,
    ) -> Option<RegistryHandle> {
        if !self.contains(root) {
            return None;
        }
        let hash = self.type_hash(type_name);
        let key = ChannelKey::new(channel, type_name, hash);
        let child = self.allocate(key, now);
        if let Some(entry) = self.entry_mut(root) {
            entry.children.push(child);
        }
        Some(child)
    }

    /// Returns schema text, hash and field map for a channel key.
    pub fn schema(&mut self, key: &ChannelKey) -> SchemaInfo {
        let text = self
            .definitions
            .get(&key.type_name)
            .cloned()
            .unwrap_or_default();
        let hash = self.type_hash(&key.type_name);
        if !self.field_maps.contains_key(&key.type_name) {
            let fields = schema::parse_definition_fields(&key.type_name, &text);
            self.field_maps.insert(key.type_name.clone(), fields);
        }
        SchemaInfo {
            text,
            hash,
            fields: self.field_maps[&key.type_name].clone(),
        }
    }

    /// Returns the channel key registered under a handle, if still alive.
    pub fn lookup(&self, handle: RegistryHandle) -> Option<&ChannelKey> {
        self.slot_entry(handle).map(|entry| &entry.key)
    }

    /// Returns whether a handle still refers to a live entry.
    pub fn contains(&self, handle: RegistryHandle) -> bool {
        self.slot_entry(handle).is_some()
    }

    /// Removes an entry and its linked children immediately.
    pub fn discard(&mut self, handle: RegistryHandle) {
        let children = match self.entry_mut(handle) {
            Some(entry) => std::mem::take(&mut entry.children),
            None => return,
        };
        self.release(handle);
        for child in children {
            self.discard(child);
        }
    }

    /// Drops entries registered outside the lifetime window. Cheap when
    /// called more often than the lifetime interval.
    pub fn sweep(&mut self, now: Instant) {
        if self.lifetime.is_zero() || now.duration_since(self.last_sweep) < self.lifetime {
            return;
        }
        self.last_sweep = now;
        // The clock may not reach back a full lifetime yet.
        if let Some(cutoff) = now.checked_sub(self.lifetime) {
            self.evict_before(cutoff);
        }
    }

    /// Drops every entry registered before the cutoff, cascading to linked
    /// children regardless of their own age.
    pub fn evict_before(&mut self, cutoff: Instant) {
        let stale: Vec<RegistryHandle> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.entry.as_ref().and_then(|entry| {
                    (entry.registered_at < cutoff).then_some(RegistryHandle {
                        index: i as u32,
                        generation: slot.generation,
                    })
                })
            })
            .collect();
        for handle in stale {
            self.discard(handle);
        }
    }

    /// Number of live arena entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all entries and type metadata. Used at batch boundaries.
    pub fn clear(&mut self) {
        self.definitions.clear();
        self.hashes.clear();
        self.field_maps.clear();
        self.slots.clear();
        self.free.clear();
    }

    fn allocate(&mut self, key: ChannelKey, now: Instant) -> RegistryHandle {
        let entry = RegistryEntry {
            key,
            registered_at: now,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                RegistryHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                RegistryHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, handle: RegistryHandle) {
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            if slot.generation == handle.generation && slot.entry.is_some() {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(handle.index);
            }
        }
    }

    fn slot_entry(&self, handle: RegistryHandle) -> Option<&RegistryEntry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, handle: RegistryHandle) -> Option<&mut RegistryEntry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
