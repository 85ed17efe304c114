//! Reference-counted object storage for the in-process runtime.

use std::ffi::CString;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::handle::NativeHandle;

/// Distance between consecutive object addresses.
const OBJECT_STRIDE: usize = 16;

/// Instance data of a heap object.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain instance with no built-in storage.
    Empty,
    /// `NSString` contents, NUL-terminated so `UTF8String` can hand out a
    /// stable pointer.
    String(CString),
    /// `NSMutableArray` elements. Each element holds one retain.
    Array(Vec<NativeHandle>),
}

/// One live object.
#[derive(Debug)]
pub struct HeapObject {
    pub class: NativeHandle,
    pub retain_count: usize,
    pub payload: Payload,
}

/// Heap of reference-counted native objects keyed by address.
///
/// Addresses are handed out monotonically and never reused, so a handle to
/// a deallocated object stays invalid instead of aliasing a newer object.
pub struct ObjectHeap {
    objects: FxHashMap<NativeHandle, HeapObject>,
    next_address: usize,
    allocated: usize,
    freed: usize,
}

impl ObjectHeap {
    /// Create an empty heap handing out addresses from `base`.
    pub fn new(base: usize) -> Self {
        Self {
            objects: FxHashMap::default(),
            next_address: base,
            allocated: 0,
            freed: 0,
        }
    }

    /// Allocate an object with a retain count of 1.
    pub fn allocate(&mut self, class: NativeHandle, payload: Payload) -> NativeHandle {
        let handle = NativeHandle(self.next_address);
        self.next_address += OBJECT_STRIDE;
        self.allocated += 1;
        self.objects.insert(
            handle,
            HeapObject {
                class,
                retain_count: 1,
                payload,
            },
        );
        handle
    }

    pub fn get(&self, handle: NativeHandle) -> Option<&HeapObject> {
        self.objects.get(&handle)
    }

    pub fn get_mut(&mut self, handle: NativeHandle) -> Option<&mut HeapObject> {
        self.objects.get_mut(&handle)
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.objects.contains_key(&handle)
    }

    /// Increment the retain count. Returns false for a dead handle.
    pub fn retain(&mut self, handle: NativeHandle) -> bool {
        if let Some(obj) = self.objects.get_mut(&handle) {
            obj.retain_count = obj.retain_count.saturating_add(1);
            return true;
        }
        false
    }

    /// Decrement the retain count, removing the object at zero.
    ///
    /// Returns the removed object so the caller can release what it held.
    pub fn release(&mut self, handle: NativeHandle) -> Option<HeapObject> {
        let obj = self.objects.get_mut(&handle)?;
        obj.retain_count = obj.retain_count.saturating_sub(1);
        if obj.retain_count == 0 {
            self.freed += 1;
            return self.objects.remove(&handle);
        }
        None
    }

    pub fn retain_count(&self, handle: NativeHandle) -> Option<usize> {
        self.objects.get(&handle).map(|o| o.retain_count)
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.objects.len()
    }

    /// Total allocations since creation.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Total deallocations since creation.
    pub fn freed(&self) -> usize {
        self.freed
    }
}

impl fmt::Debug for ObjectHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeap")
            .field("live", &self.objects.len())
            .field("allocated", &self.allocated)
            .field("freed", &self.freed)
            .finish()
    }
}
