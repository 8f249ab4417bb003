//! Variable-length values chained across plain pages.
//!
//! ```text
//! Head page:  | size: u64 | data ...           | next_pgid: u32 |
//! Other page: | data ...                       | next_pgid: u32 |
//! ```
//!
//! `next_pgid == 0` terminates the chain. The head page is the blob's
//! identity; rewriting reuses the existing chain and frees surplus tail
//! pages.

use crate::storage::page_manager::{PageId, PageManager, PlainPage, PAGE_SIZE};

const HEAD_DATA_OFF: usize = 8;
const NEXT_OFF: usize = PAGE_SIZE - 4;
const HEAD_CAPACITY: usize = PAGE_SIZE - 8 - 4;
const BODY_CAPACITY: usize = PAGE_SIZE - 4;

pub struct Blob {
    pgm: PageManager,
    head: PageId,
}

impl Blob {
    pub fn create(pgm: &PageManager) -> Blob {
        let page = pgm.alloc_plain();
        page.write_u64(0, 0);
        page.write_u32(NEXT_OFF, 0);
        Blob {
            pgm: pgm.clone(),
            head: page.id(),
        }
    }

    pub fn open(pgm: &PageManager, head: PageId) -> Blob {
        Blob {
            pgm: pgm.clone(),
            head,
        }
    }

    pub fn head_pgid(&self) -> PageId {
        self.head
    }

    pub fn size(&self) -> u64 {
        self.pgm.get_plain(self.head).read_u64(0)
    }

    /// Stream `data` through the chain, allocating pages as needed and
    /// freeing the surplus tail when shrinking.
    pub fn rewrite(&self, data: &[u8]) {
        let mut cur: PlainPage = self.pgm.get_plain(self.head);
        cur.write_u64(0, data.len() as u64);

        let mut off = 0usize;
        let mut capacity = HEAD_CAPACITY;
        let mut data_off = HEAD_DATA_OFF;
        loop {
            let chunk = std::cmp::min(capacity, data.len() - off);
            cur.write(data_off, &data[off..off + chunk]);
            off += chunk;
            if off == data.len() {
                break;
            }
            let next = cur.read_u32(NEXT_OFF);
            let next_page = if next == 0 {
                let page = self.pgm.alloc_plain();
                page.write_u32(NEXT_OFF, 0);
                cur.write_u32(NEXT_OFF, page.id());
                page
            } else {
                self.pgm.get_plain(next)
            };
            cur = next_page;
            capacity = BODY_CAPACITY;
            data_off = 0;
        }

        // Free any remaining tail.
        let tail = cur.read_u32(NEXT_OFF);
        cur.write_u32(NEXT_OFF, 0);
        drop(cur);
        self.free_chain(tail);
    }

    pub fn read(&self) -> Vec<u8> {
        let head = self.pgm.get_plain(self.head);
        let size = head.read_u64(0) as usize;
        let mut out = Vec::with_capacity(size);

        let chunk = std::cmp::min(HEAD_CAPACITY, size);
        out.extend_from_slice(&head.read(HEAD_DATA_OFF, chunk));
        let mut next = head.read_u32(NEXT_OFF);
        drop(head);
        while out.len() < size {
            assert!(next != 0, "blob chain ends before {} bytes", size);
            let page = self.pgm.get_plain(next);
            let chunk = std::cmp::min(BODY_CAPACITY, size - out.len());
            out.extend_from_slice(&page.read(0, chunk));
            next = page.read_u32(NEXT_OFF);
        }
        out
    }

    /// Free every page of the chain, including the head.
    pub fn destroy(self) {
        let head = self.head;
        self.free_chain(head);
    }

    fn free_chain(&self, mut pgid: PageId) {
        while pgid != 0 {
            let next = self.pgm.get_plain(pgid).read_u32(NEXT_OFF);
            self.pgm.free(pgid);
            pgid = next;
        }
    }
}
