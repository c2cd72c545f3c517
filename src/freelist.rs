//! Defines the [`Freelist`] struct and associated constants and functions.

use core::mem::{align_of, size_of};
use core::ptr::{null_mut, NonNull};

use super::util::in_range;

pub const NODE_SIZE: usize = size_of::<Node>();
pub const NODE_ALIGN: usize = align_of::<Node>();

/// The view of a free block: its first word is reinterpreted as the link to the next free block.
#[repr(C)]
pub struct Node {
    pub next: *mut Node,
}

/// An intrusive singly linked list threaded through the free blocks of a pool.
#[derive(Debug)]
#[repr(C)]
pub struct Freelist {
    head: *mut Node,
    len: usize,
}

impl Default for Freelist {
    fn default() -> Self {
        Freelist::new()
    }
}

impl Freelist {
    /// Creates an empty Freelist.
    #[inline]
    pub const fn new() -> Self {
        Freelist {
            head: null_mut(),
            len: 0,
        }
    }

    /// Turns the memory pointed to by `p` into a node and adds it to the front of the Freelist.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `p` points to a block of at least
    /// [`NODE_SIZE`] bytes with [`NODE_ALIGN`] alignment that nobody else uses,
    /// and that `p` is not already in the list.
    #[inline]
    pub unsafe fn push_front(&mut self, p: *mut Node) {
        debug_assert!(!p.is_null());
        debug_assert_eq!(p as usize % NODE_ALIGN, 0);

        p.write(Node { next: self.head });
        self.head = p;
        self.len += 1;
    }

    /// Removes and returns the first node or `None` if the list is empty.
    /// This operation has a time complexity of *O*(1).
    #[inline]
    pub fn pop_front(&mut self) -> Option<NonNull<Node>> {
        let head = NonNull::new(self.head)?;
        // Every node in the list was written by `push_front`.
        self.head = unsafe { (*head.as_ptr()).next };
        self.len -= 1;
        Some(head)
    }

    /// Returns the head of the list or `None` if the list is empty.
    #[inline]
    pub fn head(&self) -> Option<NonNull<Node>> {
        NonNull::new(self.head)
    }

    /// Returns the number of nodes in the list.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Counts the nodes that live in `[low, high)`.
    /// This operation has a time complexity of *O*(n).
    pub fn count_in_range(&self, low: *const u8, high: *const u8) -> usize {
        let mut count = 0;
        let mut p = self.head;
        while !p.is_null() {
            if in_range(p.cast(), low, high) {
                count += 1;
            }
            p = unsafe { (*p).next };
        }
        count
    }

    /// Unlinks every node that lives in `[low, high)` and returns how many were removed.
    /// This operation has a time complexity of *O*(n).
    pub fn remove_in_range(&mut self, low: *const u8, high: *const u8) -> usize {
        let mut removed = 0;
        let mut link: *mut *mut Node = &mut self.head;
        unsafe {
            while !(*link).is_null() {
                let node = *link;
                if in_range(node.cast(), low, high) {
                    *link = (*node).next;
                    removed += 1;
                } else {
                    link = &mut (*node).next;
                }
            }
        }
        self.len -= removed;
        removed
    }

    /// Moves every node of `other` to the front of this list, leaving `other` empty.
    /// This operation has a time complexity of *O*(`other.len()`).
    pub fn splice(&mut self, other: &mut Freelist) {
        let Some(other_head) = other.head() else {
            return;
        };
        let mut tail = other_head.as_ptr();
        unsafe {
            while !(*tail).next.is_null() {
                tail = (*tail).next;
            }
            (*tail).next = self.head;
        }
        self.head = other_head.as_ptr();
        self.len += other.len;
        *other = Freelist::new();
    }
}
