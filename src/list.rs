use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Link written inside a free block. It carries no data of its own: the
/// block it lives in is the data.
#[repr(C)]
pub(crate) struct Node {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
}

/// Intrusive singly linked LIFO list.
///
/// It is very important for us that, because we are the actual memory
/// allocator, this list can not make allocations itself. Nodes are written
/// into memory the caller already owns (the unused payload of a free block).
pub(crate) struct List {
    head: Link<Node>,
    len: usize,
}

pub(crate) struct Iter<'a> {
    current: Link<Node>,
    marker: PhantomData<&'a Node>,
}

impl List {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Writes a new node at `addr` and links it as the head of the list.
    ///
    /// **SAFETY**: Caller (we, as the allocator) must guarantee that the given
    /// `addr` is valid for writes, word aligned, and not already on a list.
    pub unsafe fn push(&mut self, addr: NonNull<Node>) {
        unsafe {
            addr.as_ptr().write(Node { next: self.head });
        }

        self.head = Some(addr);
        self.len += 1;
    }

    /// Unlinks and returns the head of the list.
    pub fn pop(&mut self) -> Link<Node> {
        let node = self.head?;

        unsafe {
            self.head = node.as_ref().next;
        }
        self.len -= 1;

        Some(node)
    }

    /// Unlinks `node`, whose predecessor is `prev` (`None` when `node` is the
    /// head). Keeping the predecessor around is what makes this O(1).
    ///
    /// **SAFETY**: `prev` must really be the node linked right before `node`.
    pub unsafe fn remove_after(&mut self, prev: Link<Node>, node: NonNull<Node>) {
        unsafe {
            let next = node.as_ref().next;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }
        }

        self.len -= 1;
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.head,
            marker: PhantomData,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = NonNull<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }

        Some(node)
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = NonNull<Node>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
