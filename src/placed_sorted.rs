// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Sorted array laid out in place inside a shared region. Legacy companion
// to the placed allocator; kept for layouts that index region-resident
// records by key.

use std::cmp::Ordering;
use std::marker::PhantomData;

/// Comparison against a query type, which may be a reduced key rather than
/// a whole element. Implementations must be consistent with the ordering
/// used at insert time.
pub trait PlacedCompare<Q: ?Sized> {
    fn compare_to(&self, query: &Q) -> Ordering;
}

/// Placed sorted array header; `max_count` elements of `T` follow
/// immediately after. `T` must be plain data (`Copy`, `#[repr(C)]`).
#[repr(C)]
pub struct PlacedSortedArray<T> {
    pub max_count: i32,
    pub count: i32,
    _marker: PhantomData<T>,
}

impl<T: Copy> PlacedSortedArray<T> {
    const STRUCT_SIZE: i32 = 8;

    pub fn mem_size(max_count: i32) -> i32 {
        Self::STRUCT_SIZE + max_count * std::mem::size_of::<T>() as i32
    }

    /// Reinterpret `mem` as a placed sorted array.
    ///
    /// # Safety
    /// `mem` must point to at least `mem_size(max_count)` writable bytes,
    /// aligned for `T`, that stay mapped for `'a`.
    pub unsafe fn place_at<'a>(mem: *mut u8) -> &'a mut PlacedSortedArray<T> {
        &mut *(mem as *mut PlacedSortedArray<T>)
    }

    pub fn init(&mut self, max_count: i32) {
        self.max_count = max_count;
        self.count = 0;
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.max_count
    }

    fn elems(&self) -> *mut T {
        unsafe {
            (self as *const PlacedSortedArray<T> as *mut u8).add(Self::STRUCT_SIZE as usize)
                as *mut T
        }
    }

    pub fn get_at(&self, index: i32) -> &T {
        debug_assert!(index >= 0 && index < self.count);
        unsafe { &*self.elems().add(index as usize) }
    }

    pub fn get_at_mut(&mut self, index: i32) -> &mut T {
        debug_assert!(index >= 0 && index < self.count);
        unsafe { &mut *self.elems().add(index as usize) }
    }

    /// Insert keeping sort order. Returns the insertion index, or -1 when
    /// full.
    pub fn insert(&mut self, val: T) -> i32
    where
        T: PlacedCompare<T>,
    {
        if self.is_full() {
            return -1;
        }
        let (index, _) = self.find(&val);
        self.insert_presorted(val, index);
        index
    }

    /// Insert at an index previously obtained from `find`.
    pub fn insert_presorted(&mut self, val: T, index: i32) -> bool {
        if self.is_full() {
            return false;
        }
        let arr = self.elems();
        if index < self.count {
            unsafe {
                std::ptr::copy(
                    arr.add(index as usize),
                    arr.add(index as usize + 1),
                    (self.count - index) as usize,
                );
            }
        }
        unsafe { arr.add(index as usize).write(val) };
        self.count += 1;
        true
    }

    pub fn remove_index(&mut self, index: i32) {
        if index < 0 || index >= self.count {
            return;
        }
        self.count -= 1;
        if index < self.count {
            let arr = self.elems();
            unsafe {
                std::ptr::copy(
                    arr.add(index as usize + 1),
                    arr.add(index as usize),
                    (self.count - index) as usize,
                );
            }
        }
    }

    pub fn remove_index_range(&mut self, start_index: i32, end_index: i32) {
        let start_index = start_index.max(0);
        let end_index = end_index.min(self.count);
        if end_index <= start_index {
            return;
        }
        let removed = end_index - start_index;
        self.count -= removed;
        let arr = self.elems();
        unsafe {
            std::ptr::copy(
                arr.add(end_index as usize),
                arr.add(start_index as usize),
                (self.count - start_index) as usize,
            );
        }
    }

    pub fn remove_value(&mut self, val: &T)
    where
        T: PlacedCompare<T>,
    {
        let (index, found) = self.find(val);
        if found {
            self.remove_index(index);
        }
    }

    /// Remove every element matching the query.
    pub fn remove_matching<Q: ?Sized>(&mut self, query: &Q)
    where
        T: PlacedCompare<Q>,
    {
        let (start, end) = self.find_range(query);
        self.remove_index_range(start, end);
    }

    /// Binary search. Returns `(index, found)`; when not found, `index` is
    /// the sorted insertion point.
    pub fn find<Q: ?Sized>(&self, query: &Q) -> (i32, bool)
    where
        T: PlacedCompare<Q>,
    {
        self.find_internal(query, false, false)
    }

    pub fn contains<Q: ?Sized>(&self, query: &Q) -> bool
    where
        T: PlacedCompare<Q>,
    {
        self.find(query).1
    }

    /// Half-open index range `[start, end)` of elements matching the query.
    pub fn find_range<Q: ?Sized>(&self, query: &Q) -> (i32, i32)
    where
        T: PlacedCompare<Q>,
    {
        let (start, found) = self.find_internal(query, true, false);
        if !found {
            return (0, 0);
        }
        let (last, _) = self.find_internal(query, false, true);
        (start, last + 1)
    }

    fn find_internal<Q: ?Sized>(&self, query: &Q, find_low: bool, find_high: bool) -> (i32, bool)
    where
        T: PlacedCompare<Q>,
    {
        let mut low_idx = 0i32;
        let mut high_idx = self.count - 1;

        let mut last_found = 0;
        let mut found = false;

        while low_idx <= high_idx {
            let mid_idx = (low_idx + high_idx) / 2;
            let elem = unsafe { &*self.elems().add(mid_idx as usize) };
            match elem.compare_to(query) {
                Ordering::Greater => high_idx = mid_idx - 1,
                Ordering::Less => low_idx = mid_idx + 1,
                Ordering::Equal => {
                    found = true;
                    last_found = mid_idx;
                    if find_low {
                        high_idx = mid_idx - 1;
                    } else if find_high {
                        low_idx = mid_idx + 1;
                    } else {
                        break;
                    }
                }
            }
        }

        if found {
            (last_found, true)
        } else {
            (low_idx, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    #[repr(C)]
    struct Entry {
        key: i32,
        value: i32,
    }

    impl PlacedCompare<Entry> for Entry {
        fn compare_to(&self, other: &Entry) -> Ordering {
            self.key.cmp(&other.key)
        }
    }

    impl PlacedCompare<i32> for Entry {
        fn compare_to(&self, key: &i32) -> Ordering {
            self.key.cmp(key)
        }
    }

    // u64 backing keeps the placed struct aligned
    fn make_array(max: i32) -> (Vec<u64>, *mut u8) {
        let size = PlacedSortedArray::<Entry>::mem_size(max) as usize;
        let buf = vec![0u64; (size + 7) / 8];
        let ptr = buf.as_ptr() as *mut u8;
        (buf, ptr)
    }

    #[test]
    fn insert_keeps_order() {
        let (_buf, ptr) = make_array(16);
        let arr = unsafe { PlacedSortedArray::<Entry>::place_at(ptr) };
        arr.init(16);

        for key in [5, 1, 9, 3, 7] {
            assert!(arr.insert(Entry { key, value: key * 10 }) >= 0);
        }

        assert_eq!(arr.count, 5);
        let keys: Vec<i32> = (0..arr.count).map(|i| arr.get_at(i).key).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn find_by_reduced_key() {
        let (_buf, ptr) = make_array(8);
        let arr = unsafe { PlacedSortedArray::<Entry>::place_at(ptr) };
        arr.init(8);

        arr.insert(Entry { key: 2, value: 20 });
        arr.insert(Entry { key: 4, value: 40 });

        assert!(arr.contains(&4));
        assert!(!arr.contains(&3));
        let (idx, found) = arr.find(&3);
        assert!(!found);
        assert_eq!(idx, 1); // insertion point between 2 and 4
    }

    #[test]
    fn full_array_rejects_insert() {
        let (_buf, ptr) = make_array(2);
        let arr = unsafe { PlacedSortedArray::<Entry>::place_at(ptr) };
        arr.init(2);

        assert!(arr.insert(Entry { key: 1, value: 0 }) >= 0);
        assert!(arr.insert(Entry { key: 2, value: 0 }) >= 0);
        assert_eq!(arr.insert(Entry { key: 3, value: 0 }), -1);
    }

    #[test]
    fn remove_range_of_duplicates() {
        let (_buf, ptr) = make_array(8);
        let arr = unsafe { PlacedSortedArray::<Entry>::place_at(ptr) };
        arr.init(8);

        arr.insert(Entry { key: 1, value: 1 });
        arr.insert(Entry { key: 2, value: 1 });
        arr.insert(Entry { key: 2, value: 2 });
        arr.insert(Entry { key: 3, value: 1 });

        let (start, end) = arr.find_range(&2);
        assert_eq!((start, end), (1, 3));

        arr.remove_matching(&2);
        assert_eq!(arr.count, 2);
        assert_eq!(arr.get_at(0).key, 1);
        assert_eq!(arr.get_at(1).key, 3);
    }
}
