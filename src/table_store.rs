// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// File-backed, memory-mapped key → i64 table shared between processes.
//
// Layout (all offsets from the start of the file):
//   0      Header (64 bytes): magic, layout version, capacity, entry count
//   64     Slot[capacity] (64 bytes each): key bytes, key length, value
//
// Slots are append-only: a slot is claimed by writing its value and key and
// then publishing the new entry count with release ordering, all inside the
// store's exclusive scope. Readers only look at published slots.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::{self, addr_of_mut};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::cell::{CellStore, LockCell, UNLOCKED};
use crate::platform::{FileLock, PlatformMap};

const MAGIC: [u8; 8] = *b"TSLOCK\0\x01";
const LAYOUT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 64;
const SLOT_SIZE: usize = 64;

/// Number of slots in a store created by [`TableStore::open`].
pub const DEFAULT_CAPACITY: u32 = 64;
/// Longest key (in bytes) a slot can hold.
pub const MAX_KEY_LEN: usize = 48;

#[repr(C)]
struct Header {
    magic: [u8; 8],
    version: u32,
    capacity: u32,
    count: AtomicU32,
    _reserved: [u8; 44],
}

#[repr(C)]
struct Slot {
    key: [u8; MAX_KEY_LEN],
    key_len: u32,
    _reserved: u32,
    value: AtomicI64,
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<Slot>() == SLOT_SIZE);

fn table_size(capacity: u32) -> usize {
    HEADER_SIZE + capacity as usize * SLOT_SIZE
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn validate_key(key: &str) -> io::Result<()> {
    if key.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "key is empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("key '{key}' is longer than {MAX_KEY_LEN} bytes"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Mapping: the mapped file, shared by the store and every value handle
// ---------------------------------------------------------------------------

struct Mapping {
    map: PlatformMap,
    file: File,
    capacity: u32,
}

impl Mapping {
    fn header(&self) -> &Header {
        unsafe { &*(self.map.as_ptr() as *const Header) }
    }

    fn slot_ptr(&self, index: usize) -> *mut Slot {
        debug_assert!(index < self.capacity as usize);
        unsafe { self.map.as_mut_ptr().add(HEADER_SIZE + index * SLOT_SIZE) as *mut Slot }
    }

    fn slot(&self, index: usize) -> &Slot {
        unsafe { &*self.slot_ptr(index) }
    }

    fn published(&self) -> usize {
        (self.header().count.load(Ordering::Acquire) as usize).min(self.capacity as usize)
    }

    fn slot_key(&self, index: usize) -> &[u8] {
        let slot = self.slot(index);
        let len = (slot.key_len as usize).min(MAX_KEY_LEN);
        &slot.key[..len]
    }

    fn find(&self, key: &str) -> Option<usize> {
        (0..self.published()).find(|&i| self.slot_key(i) == key.as_bytes())
    }
}

fn init_header(map: &PlatformMap, capacity: u32) {
    let header = map.as_mut_ptr() as *mut Header;
    unsafe {
        ptr::write(addr_of_mut!((*header).version), LAYOUT_VERSION);
        ptr::write(addr_of_mut!((*header).capacity), capacity);
        (*header).count.store(0, Ordering::Relaxed);
        // Magic goes last so a torn initialisation never validates.
        ptr::write(addr_of_mut!((*header).magic), MAGIC);
    }
}

fn validate_header(map: &PlatformMap, path: &Path) -> io::Result<u32> {
    let header = unsafe { &*(map.as_ptr() as *const Header) };
    if header.magic != MAGIC {
        return Err(invalid_data(format!("{} is not a table store", path.display())));
    }
    if header.version != LAYOUT_VERSION {
        return Err(invalid_data(format!(
            "{}: unsupported layout version {} (expected {LAYOUT_VERSION})",
            path.display(),
            header.version
        )));
    }
    if header.capacity == 0 || table_size(header.capacity) != map.len() {
        return Err(invalid_data(format!(
            "{}: capacity {} does not match file size {}",
            path.display(),
            header.capacity,
            map.len()
        )));
    }
    Ok(header.capacity)
}

// ---------------------------------------------------------------------------
// ExclusiveScope: reentrant per thread, exclusive across threads + processes
// ---------------------------------------------------------------------------

// flock(2) locks belong to the open file description, which every thread of
// this process shares, so threads are serialised here before the flock.
#[derive(Default)]
struct ScopeState {
    owner: Option<ThreadId>,
    depth: usize,
}

#[derive(Default)]
struct ExclusiveScope {
    state: Mutex<ScopeState>,
    released: Condvar,
}

impl ExclusiveScope {
    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if the calling thread already owned the scope.
    fn enter(&self) -> bool {
        let me = thread::current().id();
        let mut st = self.state();
        if st.owner == Some(me) {
            st.depth += 1;
            return true;
        }
        while st.owner.is_some() {
            st = self.released.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
        st.owner = Some(me);
        st.depth = 1;
        false
    }

    fn leave(&self) {
        let mut st = self.state();
        st.depth = st.depth.saturating_sub(1);
        if st.depth == 0 {
            st.owner = None;
            self.released.notify_one();
        }
    }
}

struct ScopeGuard<'a> {
    scope: &'a ExclusiveScope,
    file_lock: Option<FileLock<'a>>,
}

impl<'a> Drop for ScopeGuard<'a> {
    fn drop(&mut self) {
        // Unlock the file before another thread can become owner.
        drop(self.file_lock.take());
        self.scope.leave();
    }
}

// ---------------------------------------------------------------------------
// TableStore
// ---------------------------------------------------------------------------

/// A persisted table of named 64-bit values.
///
/// Every process that opens the same path sees the same values; they survive
/// the processes that wrote them.
pub struct TableStore {
    mapping: Arc<Mapping>,
    path: PathBuf,
    scope: ExclusiveScope,
}

impl TableStore {
    /// Open (or create with [`DEFAULT_CAPACITY`] slots) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_capacity(path, DEFAULT_CAPACITY)
    }

    /// Open the store at `path`, creating it with `capacity` slots if the
    /// file is missing or empty. An existing store keeps its own capacity.
    pub fn open_with_capacity(path: impl AsRef<Path>, capacity: u32) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "capacity is 0"));
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Size check and initialisation must not interleave with another
        // process doing the same.
        let (map, capacity) = {
            let _lock = FileLock::exclusive(&file)?;
            let len = file.metadata()?.len();
            if len == 0 {
                let size = table_size(capacity);
                file.set_len(size as u64)?;
                let map = PlatformMap::map(&file, size)?;
                init_header(&map, capacity);
                log::debug!("created table store {} with {capacity} slots", path.display());
                (map, capacity)
            } else {
                if (len as usize) < HEADER_SIZE {
                    return Err(invalid_data(format!(
                        "{}: file too small ({len} bytes)",
                        path.display()
                    )));
                }
                let map = PlatformMap::map(&file, len as usize)?;
                let capacity = validate_header(&map, &path)?;
                (map, capacity)
            }
        };

        Ok(Self {
            mapping: Arc::new(Mapping {
                map,
                file,
                capacity,
            }),
            path,
            scope: ExclusiveScope::default(),
        })
    }

    /// Attach to `key`, allocating it as [`UNLOCKED`] if absent.
    pub fn acquire_value_for(&self, key: &str) -> io::Result<LongValue> {
        self.acquire_value_for_with_default(key, UNLOCKED)
    }

    /// Attach to `key`, allocating it with `default` if absent. An existing
    /// value is never overwritten.
    pub fn acquire_value_for_with_default(&self, key: &str, default: i64) -> io::Result<LongValue> {
        validate_key(key)?;
        if let Some(index) = self.mapping.find(key) {
            return Ok(self.handle(index, key));
        }
        self.do_with_exclusive_lock(|ts| {
            // Another thread or process may have won the allocation.
            if let Some(index) = ts.mapping.find(key) {
                return Ok(ts.handle(index, key));
            }
            let index = ts.mapping.published();
            if index >= ts.mapping.capacity as usize {
                return Err(io::Error::new(
                    io::ErrorKind::StorageFull,
                    format!(
                        "table store {} is full ({} entries)",
                        ts.path.display(),
                        ts.mapping.capacity
                    ),
                ));
            }
            let slot = ts.mapping.slot_ptr(index);
            unsafe {
                (*slot).value.store(default, Ordering::Relaxed);
                ptr::copy_nonoverlapping(
                    key.as_ptr(),
                    addr_of_mut!((*slot).key) as *mut u8,
                    key.len(),
                );
                ptr::write(addr_of_mut!((*slot).key_len), key.len() as u32);
            }
            ts.mapping
                .header()
                .count
                .store(index as u32 + 1, Ordering::Release);
            log::debug!("allocated '{key}' in slot {index} of {}", ts.path.display());
            Ok(ts.handle(index, key))
        })
    }

    fn handle(&self, index: usize, key: &str) -> LongValue {
        LongValue {
            mapping: Arc::clone(&self.mapping),
            index,
            key: key.to_owned(),
            closed: AtomicBool::new(false),
        }
    }

    /// Run `f` inside the store's exclusive scope. Reentrant on the calling
    /// thread; exclusive against other threads and other processes.
    pub fn do_with_exclusive_lock<R, F>(&self, f: F) -> io::Result<R>
    where
        F: FnOnce(&Self) -> io::Result<R>,
    {
        let reentered = self.scope.enter();
        let mut guard = ScopeGuard {
            scope: &self.scope,
            file_lock: None,
        };
        if !reentered {
            guard.file_lock = Some(FileLock::exclusive(&self.mapping.file)?);
        }
        let result = f(self);
        drop(guard);
        result
    }

    /// Keys allocated so far, in allocation order.
    pub fn keys(&self) -> Vec<String> {
        (0..self.mapping.published())
            .map(|i| String::from_utf8_lossy(self.mapping.slot_key(i)).into_owned())
            .collect()
    }

    /// Number of allocated keys.
    pub fn len(&self) -> usize {
        self.mapping.published()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.mapping.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask the OS to write dirty pages back to the file.
    pub fn flush(&self) -> io::Result<()> {
        self.mapping.map.flush_async()
    }
}

impl CellStore for TableStore {
    type Cell = LongValue;

    fn acquire_cell(&self, key: &str) -> io::Result<LongValue> {
        self.acquire_value_for(key)
    }

    fn do_with_exclusive_lock<R, F>(&self, f: F) -> io::Result<R>
    where
        F: FnOnce(&Self) -> io::Result<R>,
    {
        TableStore::do_with_exclusive_lock(self, f)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// LongValue: handle to one slot
// ---------------------------------------------------------------------------

/// Handle to one value of a [`TableStore`]. Keeps the mapping alive.
pub struct LongValue {
    mapping: Arc<Mapping>,
    index: usize,
    key: String,
    closed: AtomicBool,
}

impl LongValue {
    fn atomic(&self) -> &AtomicI64 {
        &self.mapping.slot(self.index).value
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl LockCell for LongValue {
    fn get_value(&self) -> i64 {
        self.atomic().load(Ordering::Acquire)
    }

    fn compare_and_swap_value(&self, expected: i64, new: i64) -> bool {
        self.atomic()
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("value '{}' is already closed", self.key),
            ));
        }
        Ok(())
    }
}
