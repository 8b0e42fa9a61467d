use crate::sync::{AtomicI32, AtomicPtr, Ordering};
use crate::util::zeroed_cells;
use crate::MapError;
use log::trace;
use std::ptr;

/// The number of pairs in the initial core. Deliberately tiny so that the
/// growth path is exercised from the very first handful of inserts; use
/// [`RelayMap::with_capacity`] to start larger.
const INITIAL_CAPACITY: usize = 2;

/// The maximum number of slots examined along a probe chain before the
/// core counts as overfull and must grow.
const MAX_PROBES: usize = 8;

/// 32-bit golden-ratio multiplier used to spread keys over a core.
const MAGIC: u32 = 0x9E37_79B9;

/// Key cell contents for a slot that has never been claimed.
const NULL_KEY: i32 = 0;

/// Value cell contents for a key with no value.
const NULL_VALUE: i32 = 0;

/// Tombstone for a removed key.
const DEL_VALUE: i32 = i32::MAX;

/// Terminal state of a migrated value cell; the authoritative value now
/// lives further down the chain.
const STOLEN_VALUE: i32 = i32::MIN;

/// Returns true if `value` is a value the map can store for a key, which
/// is also the range callers are allowed to pass to `put`.
#[inline]
const fn is_value(value: i32) -> bool {
    value > NULL_VALUE && value < DEL_VALUE
}

/// Collapses raw cell contents to what a caller may observe.
#[inline]
const fn to_value(raw: i32) -> i32 {
    if is_value(raw) {
        raw
    } else {
        NULL_VALUE
    }
}

/// A lock-free concurrent map from positive `i32` keys to positive `i32`
/// values.
///
/// All operations take `&self` and may be called from any number of threads
/// concurrently; none of them block. When a probe chain in the current
/// table fills up, a table of twice the capacity is linked behind it and
/// live entries are migrated forward. Migration is cooperative: every
/// thread which touches a slot that is mid-move first helps finish the
/// move, so a stalled thread can never wedge the map.
///
/// Because the map reserves a handful of `i32` encodings for its own slot
/// states, keys must be strictly positive and values must be strictly
/// positive and below `i32::MAX`. Arguments outside those ranges are
/// rejected with [`MapError`] before anything is written.
///
/// # Examples
///
/// ```
/// let map = relaymap::RelayMap::new();
/// assert_eq!(map.put(1, 10), Ok(0));
/// assert_eq!(map.get(1), Ok(10));
/// assert_eq!(map.remove(1), Ok(10));
/// assert_eq!(map.get(1), Ok(0));
/// ```
pub struct RelayMap {
    /// The core that currently leads the chain. This can lag behind the
    /// true head, since stolen slots chase the chain; lagging costs a
    /// pointer hop, never correctness.
    current: AtomicPtr<Core>,
    /// The oldest core. Retired cores stay linked so threads still in
    /// flight can finish against them; the whole chain is freed here when
    /// the map is dropped.
    root: *mut Core,
}

// Cores are shared through atomic pointers and freed exactly once, in drop.
unsafe impl Send for RelayMap {}
unsafe impl Sync for RelayMap {}

impl RelayMap {
    /// Creates an empty map with the smallest initial capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = relaymap::RelayMap::new();
    /// assert_eq!(map.get(42), Ok(0));
    /// ```
    pub fn new() -> RelayMap {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Creates an empty map with space for `capacity` entries before the
    /// first growth, rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> RelayMap {
        let root = Core::alloc(capacity.next_power_of_two().max(INITIAL_CAPACITY));
        RelayMap {
            current: AtomicPtr::new(root),
            root,
        }
    }

    /// Returns the value stored for `key`, or `0` if the key is absent.
    ///
    /// Fails for a non-positive `key`.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = relaymap::RelayMap::new();
    /// map.put(1, 10).unwrap();
    /// assert_eq!(map.get(1), Ok(10));
    /// assert_eq!(map.get(2), Ok(0));
    /// assert!(map.get(0).is_err());
    /// ```
    pub fn get(&self, key: i32) -> Result<i32, MapError> {
        if key <= 0 {
            return Err(MapError::KeyOutOfRange(key));
        }
        Ok(to_value(self.current_core().get_internal(key)))
    }

    /// Installs `value` for `key`, returning the previous value or `0` if
    /// the key was absent.
    ///
    /// Fails for a non-positive `key`, and for a `value` outside
    /// `1..i32::MAX`.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = relaymap::RelayMap::new();
    /// assert_eq!(map.put(5, 100), Ok(0));
    /// assert_eq!(map.put(5, 200), Ok(100));
    /// ```
    pub fn put(&self, key: i32, value: i32) -> Result<i32, MapError> {
        if key <= 0 {
            return Err(MapError::KeyOutOfRange(key));
        }
        if !is_value(value) {
            return Err(MapError::ValueOutOfRange(value));
        }
        Ok(to_value(self.update(key, value)))
    }

    /// Removes `key`, returning the previous value or `0` if the key was
    /// absent.
    ///
    /// Fails for a non-positive `key`.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = relaymap::RelayMap::new();
    /// map.put(2, 17).unwrap();
    /// assert_eq!(map.remove(2), Ok(17));
    /// assert_eq!(map.remove(2), Ok(0));
    /// ```
    pub fn remove(&self, key: i32) -> Result<i32, MapError> {
        if key <= 0 {
            return Err(MapError::KeyOutOfRange(key));
        }
        Ok(to_value(self.update(key, DEL_VALUE)))
    }

    /// Applies `value` (a live value or the tombstone) to `key`, growing
    /// the map as many times as it takes, and returns the raw previous
    /// cell contents.
    fn update(&self, key: i32, value: i32) -> i32 {
        loop {
            let core = self.current_core();
            match core.put_internal(key, value) {
                PutResult::Previous(raw) => return raw,
                PutResult::Overflow => {
                    let next = core.rehash();
                    // A failed exchange means a concurrent promotion won;
                    // the pointer only ever moves forward along the chain.
                    let _ = self.current.compare_exchange(
                        core as *const Core as *mut Core,
                        next as *const Core as *mut Core,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                }
            }
        }
    }

    fn current_core(&self) -> &Core {
        // Cores are never freed while the map is alive.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }
}

impl Default for RelayMap {
    fn default() -> RelayMap {
        RelayMap::new()
    }
}

impl Drop for RelayMap {
    fn drop(&mut self) {
        let mut ptr = self.root;
        while !ptr.is_null() {
            let core = unsafe { Box::from_raw(ptr) };
            ptr = core.next.load(Ordering::Relaxed);
        }
    }
}

/// Result of applying a mutation against a core chain.
enum PutResult {
    /// The new value is installed; holds the raw previous cell contents.
    Previous(i32),
    /// The probe window was exhausted; the core has to be rehashed before
    /// the mutation can land.
    Overflow,
}

/// One fixed-capacity table in the chain.
///
/// Storage is a flat, zero-initialized array of `2 * capacity` cells,
/// interpreted as consecutive `(key, value)` pairs. The value cell encodes
/// the slot state: `0` empty, a positive value live, `i32::MAX` a
/// tombstone, a negated value mid-migration, and `i32::MIN` fully migrated
/// to a successor. A key cell holds `0` or the key, and a written key is
/// never overwritten within the same core.
struct Core {
    cells: Box<[AtomicI32]>,
    /// Precomputed `32 - log2(capacity)` for the multiplicative hash.
    shift: u32,
    /// The successor core, linked once any probe chain here overflows.
    next: AtomicPtr<Core>,
}

impl Core {
    /// Allocates a core with `capacity` pairs, handing ownership to the
    /// caller as a raw pointer.
    fn alloc(capacity: usize) -> *mut Core {
        debug_assert!(capacity.is_power_of_two() && capacity >= INITIAL_CAPACITY);
        Box::into_raw(Box::new(Core {
            cells: zeroed_cells(capacity * 2),
            shift: 32 - capacity.trailing_zeros(),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    /// Cell index of the pair that `key` hashes to in this core.
    #[inline]
    fn pair_index(&self, key: i32) -> usize {
        (((key as u32).wrapping_mul(MAGIC) >> self.shift) as usize) << 1
    }

    /// Steps one pair backwards, wrapping from the first pair to the last.
    #[inline]
    fn prev_pair(&self, index: usize) -> usize {
        if index == 0 {
            self.cells.len() - 2
        } else {
            index - 2
        }
    }

    #[inline]
    fn cell(&self, index: usize) -> &AtomicI32 {
        debug_assert!(index < self.cells.len());
        unsafe { self.cells.get_unchecked(index) }
    }

    fn next_core(&self) -> Option<&Core> {
        unsafe { self.next.load(Ordering::Acquire).as_ref() }
    }

    /// The successor core, which the protocol guarantees to exist once any
    /// slot here reads frozen or stolen.
    fn successor(&self) -> &Core {
        match self.next_core() {
            Some(next) => next,
            None => panic!("slot state implies a successor core, but none is linked"),
        }
    }

    /// Looks `key` up, chasing migrated slots down the chain, and returns
    /// the raw cell contents.
    fn get_internal(&self, key: i32) -> i32 {
        let mut core = self;
        'chase: loop {
            let mut index = core.pair_index(key);
            let mut probes = 0;

            // Locate the key slot.
            loop {
                let probe_key = core.cell(index).load(Ordering::Relaxed);
                if probe_key == key {
                    break;
                }
                if probe_key == NULL_KEY {
                    return NULL_VALUE;
                }
                probes += 1;
                if probes >= MAX_PROBES {
                    // A full window proves absence only in a core that has
                    // never migrated entries forward.
                    match core.next_core() {
                        Some(next) => {
                            core = next;
                            continue 'chase;
                        }
                        None => return NULL_VALUE,
                    }
                }
                index = core.prev_pair(index);
            }

            // Resolve the value.
            loop {
                let value = core.cell(index + 1).load(Ordering::Acquire);
                if value == STOLEN_VALUE {
                    core = core.successor();
                    continue 'chase;
                }
                if value < 0 {
                    core.complete_copy(index);
                    continue;
                }
                return value;
            }
        }
    }

    /// Installs `value` (a live value or the tombstone) for `key`, chasing
    /// migrated slots down the chain. Returns the raw previous cell
    /// contents, or [`PutResult::Overflow`] when the probe window is
    /// exhausted and the core has to grow first.
    fn put_internal(&self, key: i32, value: i32) -> PutResult {
        let mut core = self;
        'chase: loop {
            let mut index = core.pair_index(key);
            let mut probes = 0;

            // Locate or claim a key slot.
            loop {
                let probe_key = core.cell(index).load(Ordering::Relaxed);
                if probe_key == key {
                    break;
                }
                if probe_key == NULL_KEY {
                    if value == DEL_VALUE {
                        // Nothing to tombstone.
                        return PutResult::Previous(NULL_VALUE);
                    }
                    if core
                        .cell(index)
                        .compare_exchange(NULL_KEY, key, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                    {
                        break;
                    }
                    // Lost the claim race; re-read the same slot.
                    continue;
                }
                probes += 1;
                if probes >= MAX_PROBES {
                    return PutResult::Overflow;
                }
                index = core.prev_pair(index);
            }

            // Install the value.
            loop {
                let old = core.cell(index + 1).load(Ordering::Acquire);
                if old == STOLEN_VALUE {
                    core = core.successor();
                    continue 'chase;
                }
                if old < 0 {
                    core.complete_copy(index);
                    continue;
                }
                if core
                    .cell(index + 1)
                    .compare_exchange(old, value, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return PutResult::Previous(old);
                }
            }
        }
    }

    /// Locates or claims a key slot for a migrating entry, without touching
    /// the value cell. Returns the pair's cell index, or `None` when the
    /// probe window is exhausted.
    fn claim_slot(&self, key: i32) -> Option<usize> {
        let mut index = self.pair_index(key);
        let mut probes = 0;
        loop {
            let probe_key = self.cell(index).load(Ordering::Relaxed);
            if probe_key == key {
                return Some(index);
            }
            if probe_key == NULL_KEY {
                if self
                    .cell(index)
                    .compare_exchange(NULL_KEY, key, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    return Some(index);
                }
                continue;
            }
            probes += 1;
            if probes >= MAX_PROBES {
                return None;
            }
            index = self.prev_pair(index);
        }
    }

    /// Ensures a successor core exists and drives every pair here to the
    /// stolen state, carrying live values forward. Any number of threads
    /// may run this concurrently; each slot is migrated exactly once, and
    /// the scan only returns once every slot is done.
    fn rehash(&self) -> &Core {
        if self.next.load(Ordering::Acquire).is_null() {
            // The old cell count is the new pair count, doubling capacity.
            let capacity = self.cells.len();
            let fresh = Core::alloc(capacity);
            match self.next.compare_exchange(
                ptr::null_mut(),
                fresh,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => trace!("relaymap: grew to a core of {capacity} pairs"),
                // Lost the allocation race.
                Err(_) => drop(unsafe { Box::from_raw(fresh) }),
            }
        }
        let next = self.successor();

        let mut index = 0;
        while index < self.cells.len() {
            let value = self.cell(index + 1).load(Ordering::Acquire);
            if value == STOLEN_VALUE {
                index += 2;
            } else if value < 0 {
                // Another thread froze this slot; help it across.
                self.complete_copy(index);
                index += 2;
            } else if is_value(value) {
                if self
                    .cell(index + 1)
                    .compare_exchange(value, -value, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    self.complete_copy(index);
                    index += 2;
                }
                // On a lost freeze, re-read the same slot.
            } else if self
                .cell(index + 1)
                .compare_exchange(value, STOLEN_VALUE, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // Empty and deleted slots carry nothing forward.
                index += 2;
            }
        }
        next
    }

    /// Completes the migration of the frozen pair at `index` into the
    /// chain.
    ///
    /// Callers must have observed the value cell frozen; by the time this
    /// runs another helper may already have finished, which is fine. A
    /// slot that is frozen without a claimed key, or a tombstone picked up
    /// for carrying, is a protocol violation and aborts loudly.
    fn complete_copy(&self, index: usize) {
        let frozen = self.cell(index + 1).load(Ordering::Acquire);
        if frozen == STOLEN_VALUE {
            return;
        }
        assert!(frozen < 0, "completing a copy of an unfrozen slot");
        let key = self.cell(index).load(Ordering::Relaxed);
        assert!(key > NULL_KEY, "frozen slot holds no key");
        let value = -frozen;
        assert!(is_value(value), "tombstones are never carried forward");

        let mut target = self.successor();
        loop {
            let Some(slot) = target.claim_slot(key) else {
                // The target's window for this key is full; grow it and
                // carry into the larger core.
                target = target.rehash();
                continue;
            };
            match target.cell(slot + 1).compare_exchange(
                NULL_VALUE,
                value,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                // The target itself migrated before the carry landed, so
                // the carry continues down the chain.
                Err(current) if current == STOLEN_VALUE => target = target.successor(),
                // A newer value, or another helper's copy, won the slot.
                Err(_) => break,
            }
        }

        // Another helper may get here first; either way the slot ends up
        // stolen.
        let _ = self.cell(index + 1).compare_exchange(
            frozen,
            STOLEN_VALUE,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}
