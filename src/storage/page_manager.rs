use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::debug;

use crate::{
    error::WrenError,
    storage::sorted_page::{self, SlotCmp},
};

pub const PAGE_SIZE: usize = 4096;

pub type PageId = u32;

/// Page 0 is the meta page of the page manager.
pub const META_PAGE_ID: PageId = 0;

/// Page 1 is pre-allocated for the caller. The table storage keeps the
/// meta page id of its catalog tree there.
pub const SUPER_PAGE_ID: PageId = 1;

/// Number of freed page ids a free-list page can hold. The last 4 bytes
/// of a free-list page hold the id of the next free-list page.
const PGID_PER_PAGE: usize = PAGE_SIZE / 4 - 1;

const FREE_LIST_HEAD_OFF: usize = 0;
const FREE_PAGES_IN_HEAD_OFF: usize = 4;
const PAGE_NUM_OFF: usize = 8;

#[derive(Debug)]
struct Frame {
    buf: Box<[u8]>,
    refcount: usize,
    dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Frame {
            buf: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            refcount: 1,
            dirty: false,
        }
    }
}

/// A paged file of 4096-byte pages with a bounded buffer pool.
///
/// Pages are referenced through `PlainPage`/`SortedPage` handles. A handle
/// pins the underlying buffer frame; dropping the handle unpins it. An
/// unpinned frame becomes evictable, and the frame that has been unpinned
/// for the longest time is evicted first. Dirty frames are written back on
/// eviction and at close.
///
/// Freed pages are collected in two in-memory buffers (main + standby) so
/// that frees and allocations usually cost no I/O. When both buffers fill
/// up, the standby buffer is written to one of the freed pages, which then
/// becomes the head of the on-disk free list.
///
/// All invariant violations here (double free, refcount underflow, access
/// to a freed page, eviction with every frame pinned) are unrecoverable
/// and panic.
#[derive(Clone, Debug)]
pub struct PageManager {
    store: Arc<Mutex<PageStore>>,
}

#[derive(Debug)]
struct PageStore {
    path: PathBuf,
    file: std::fs::File,
    max_buf_pages: usize,

    frames: HashMap<PageId, Frame>,
    // Front is the page that has been unpinned for the longest time.
    evictable: Vec<PageId>,

    free_main: Vec<PageId>,
    // The standby buffer is either full or empty.
    free_standby: Vec<PageId>,

    // For catching double frees and use-after-free.
    is_free: Vec<bool>,
}

impl PageManager {
    /// Create a fresh two-page file (meta + super page), truncating any
    /// existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, max_buf_pages: usize) -> Result<PageManager, WrenError> {
        // One buffer frame is taken by the permanently pinned meta page.
        assert!(max_buf_pages >= 2, "buffer pool of {} pages is too small", max_buf_pages);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let mut store = PageStore {
            path: path.as_ref().to_path_buf(),
            file,
            max_buf_pages,
            frames: HashMap::new(),
            evictable: Vec::new(),
            free_main: Vec::new(),
            free_standby: Vec::new(),
            is_free: vec![false, false],
        };
        store.alloc_meta_frame();
        store.set_meta_u32(FREE_LIST_HEAD_OFF, 0);
        store.set_meta_u32(FREE_PAGES_IN_HEAD_OFF, 0);
        store.set_meta_u32(PAGE_NUM_OFF, 2);
        store.file.set_len(2 * PAGE_SIZE as u64)?;

        Ok(PageManager {
            store: Arc::new(Mutex::new(store)),
        })
    }

    /// Open an existing page file. Returns an Io error if the file does
    /// not exist or its meta page cannot be read.
    pub fn open<P: AsRef<Path>>(path: P, max_buf_pages: usize) -> Result<PageManager, WrenError> {
        assert!(max_buf_pages >= 2, "buffer pool of {} pages is too small", max_buf_pages);

        if !path.as_ref().exists() {
            return Err(WrenError::io(&format!(
                "fail to open file {:?}: not found",
                path.as_ref()
            )));
        }
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let mut store = PageStore {
            path: path.as_ref().to_path_buf(),
            file,
            max_buf_pages,
            frames: HashMap::new(),
            evictable: Vec::new(),
            free_main: Vec::new(),
            free_standby: Vec::new(),
            is_free: Vec::new(),
        };
        store.alloc_meta_frame();
        store.load()?;

        Ok(PageManager {
            store: Arc::new(Mutex::new(store)),
        })
    }

    /// Allocate a page id. The page content is undefined until written.
    /// Never returns the meta page or the super page.
    pub fn allocate(&self) -> PageId {
        let mut store = self.store.lock().unwrap();
        let pgid = store.allocate_raw();
        if pgid as usize == store.is_free.len() {
            store.is_free.push(false);
        } else {
            assert!(store.is_free[pgid as usize], "allocated a non-free page {}", pgid);
            store.is_free[pgid as usize] = false;
        }
        debug!("allocate page {}", pgid);
        pgid
    }

    /// Return a page to the free list. The page must not be referenced by
    /// any handle. Double free is a fatal error.
    pub fn free(&self, pgid: PageId) {
        let mut store = self.store.lock().unwrap();
        store.free_page(pgid);
    }

    pub fn get_plain(&self, pgid: PageId) -> PlainPage {
        self.pin(pgid);
        PlainPage {
            pgid,
            pgm: self.clone(),
        }
    }

    pub fn get_sorted(&self, pgid: PageId, cmp: SlotCmp) -> SortedPage {
        self.pin(pgid);
        SortedPage {
            pgid,
            pgm: self.clone(),
            cmp,
        }
    }

    pub fn alloc_plain(&self) -> PlainPage {
        let pgid = self.allocate();
        self.get_plain(pgid)
    }

    /// Allocate a page and return a sorted-page handle for it. The caller
    /// must call `SortedPage::init` before the first use.
    pub fn alloc_sorted(&self, cmp: SlotCmp) -> SortedPage {
        let pgid = self.allocate();
        self.get_sorted(pgid, cmp)
    }

    pub fn super_page_id(&self) -> PageId {
        SUPER_PAGE_ID
    }

    pub fn page_num(&self) -> u32 {
        self.store.lock().unwrap().meta_u32(PAGE_NUM_OFF)
    }

    /// Compact the free list and truncate trailing free pages.
    pub fn shrink_to_fit(&self) -> Result<(), WrenError> {
        let mut store = self.store.lock().unwrap();
        store.shrink_to_fit()
    }

    fn pin(&self, pgid: PageId) {
        let mut store = self.store.lock().unwrap();
        store.pin_frame(pgid);
    }

    fn unpin(&self, pgid: PageId) {
        let mut store = self.store.lock().unwrap();
        store.unpin_frame(pgid);
    }

    /// Run `f` on the pinned frame of `pgid`. `dirty` marks the frame for
    /// write-back on eviction/close.
    fn with_frame<R>(&self, pgid: PageId, dirty: bool, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut store = self.store.lock().unwrap();
        let frame = store
            .frames
            .get_mut(&pgid)
            .unwrap_or_else(|| panic!("page {} is not pinned", pgid));
        assert!(frame.refcount > 0, "page {} is not pinned", pgid);
        frame.dirty |= dirty;
        f(&mut frame.buf)
    }

    /// Run `f` on two distinct pinned frames at once.
    fn with_two_frames<R>(
        &self,
        a: PageId,
        b: PageId,
        f: impl FnOnce(&mut [u8], &mut [u8]) -> R,
    ) -> R {
        assert!(a != b);
        let mut store = self.store.lock().unwrap();
        // Take b's buffer out so that both can be borrowed mutably.
        let mut buf_b = {
            let frame_b = store.frames.get_mut(&b).unwrap();
            assert!(frame_b.refcount > 0);
            frame_b.dirty = true;
            std::mem::replace(&mut frame_b.buf, Vec::new().into_boxed_slice())
        };
        let ret = {
            let frame_a = store.frames.get_mut(&a).unwrap();
            assert!(frame_a.refcount > 0);
            frame_a.dirty = true;
            f(&mut frame_a.buf, &mut buf_b)
        };
        store.frames.get_mut(&b).unwrap().buf = buf_b;
        ret
    }
}

impl PageStore {
    fn meta_u32(&self, off: usize) -> u32 {
        let buf = &self.frames[&META_PAGE_ID].buf;
        u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
    }

    fn set_meta_u32(&mut self, off: usize, v: u32) {
        let buf = &mut self.frames.get_mut(&META_PAGE_ID).unwrap().buf;
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn page_num(&self) -> u32 {
        self.meta_u32(PAGE_NUM_OFF)
    }

    fn alloc_meta_frame(&mut self) {
        // The meta frame is permanently pinned and marked dirty once, so
        // it is always flushed at close.
        let mut frame = Frame::new();
        frame.dirty = true;
        self.frames.insert(META_PAGE_ID, frame);
    }

    fn load(&mut self) -> Result<(), WrenError> {
        let file_len = self.file.metadata()?.len();
        self.file.seek(SeekFrom::Start(0))?;
        let buf = &mut self.frames.get_mut(&META_PAGE_ID).unwrap().buf;
        self.file
            .read_exact(buf)
            .map_err(|_| WrenError::io(&format!("error reading meta page of {:?}", self.path)))?;

        let page_num = self.page_num();
        if file_len != page_num as u64 * PAGE_SIZE as u64 {
            return Err(WrenError::io(&format!(
                "corrupted page file {:?}: {} bytes, {} pages in meta",
                self.path, file_len, page_num
            )));
        }
        self.is_free = vec![false; page_num as usize];

        let head = self.meta_u32(FREE_LIST_HEAD_OFF);
        if head == 0 {
            return Ok(());
        }

        // The head of the on-disk free list may be partially filled; its
        // occupancy is recorded in the meta page. The head page itself is
        // freed once its content is absorbed into the in-memory buffer.
        let in_head = self.meta_u32(FREE_PAGES_IN_HEAD_OFF) as usize;
        let (ids, next) = self.read_free_list_page(head, in_head)?;
        self.free_main = ids;
        self.set_meta_u32(FREE_LIST_HEAD_OFF, next);
        for &pgid in &self.free_main {
            self.is_free[pgid as usize] = true;
        }

        // Pages further down the chain are always full. Walk them to mark
        // the free flags; the chain itself stays on disk. A chain page is
        // itself a free page serving as list storage.
        let mut pgid = next;
        while pgid != 0 {
            self.is_free[pgid as usize] = true;
            let (ids, next) = self.read_free_list_page(pgid, PGID_PER_PAGE)?;
            for id in ids {
                self.is_free[id as usize] = true;
            }
            pgid = next;
        }

        self.free_page(head);
        Ok(())
    }

    fn read_free_list_page(
        &mut self,
        pgid: PageId,
        count: usize,
    ) -> Result<(Vec<PageId>, PageId), WrenError> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(pgid as u64 * PAGE_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            ids.push(u32::from_le_bytes([
                buf[i * 4],
                buf[i * 4 + 1],
                buf[i * 4 + 2],
                buf[i * 4 + 3],
            ]));
        }
        let next = u32::from_le_bytes([
            buf[PAGE_SIZE - 4],
            buf[PAGE_SIZE - 3],
            buf[PAGE_SIZE - 2],
            buf[PAGE_SIZE - 1],
        ]);
        Ok((ids, next))
    }

    fn allocate_raw(&mut self) -> PageId {
        if let Some(pgid) = self.free_main.pop() {
            return pgid;
        }
        if !self.free_standby.is_empty() {
            std::mem::swap(&mut self.free_main, &mut self.free_standby);
            return self.free_main.pop().unwrap();
        }
        let head = self.meta_u32(FREE_LIST_HEAD_OFF);
        if head != 0 {
            let (ids, next) = self
                .read_free_list_page(head, PGID_PER_PAGE)
                .expect("io error reading free list");
            self.free_main = ids;
            self.set_meta_u32(FREE_LIST_HEAD_OFF, next);
            if next != 0 {
                self.set_meta_u32(FREE_PAGES_IN_HEAD_OFF, PGID_PER_PAGE as u32);
            }
            return self.free_main.pop().unwrap();
        }
        // No free page anywhere: extend the file by one page.
        let pgid = self.page_num();
        self.set_meta_u32(PAGE_NUM_OFF, pgid + 1);
        self.file
            .set_len((pgid as u64 + 1) * PAGE_SIZE as u64)
            .expect("io error extending page file");
        pgid
    }

    fn free_page(&mut self, pgid: PageId) {
        if self.is_free[pgid as usize] {
            panic!("double free of page {}", pgid);
        }
        self.is_free[pgid as usize] = true;
        self.evictable.retain(|&p| p != pgid);
        if let Some(frame) = self.frames.remove(&pgid) {
            assert!(
                frame.refcount == 0,
                "freeing page {} with refcount {}",
                pgid,
                frame.refcount
            );
        }
        if self.free_main.len() == PGID_PER_PAGE {
            if !self.free_standby.is_empty() {
                // Both buffers are full: the page being freed becomes the
                // new head of the on-disk free list, storing the standby
                // buffer's content.
                self.flush_free_list_standby(pgid);
                return;
            }
            std::mem::swap(&mut self.free_main, &mut self.free_standby);
        }
        self.free_main.push(pgid);
    }

    fn flush_free_list_standby(&mut self, pgid: PageId) {
        let mut buf = vec![0u8; PAGE_SIZE];
        for (i, id) in self.free_standby.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&id.to_le_bytes());
        }
        let head = self.meta_u32(FREE_LIST_HEAD_OFF);
        buf[PAGE_SIZE - 4..].copy_from_slice(&head.to_le_bytes());
        self.file
            .seek(SeekFrom::Start(pgid as u64 * PAGE_SIZE as u64))
            .expect("io error");
        self.file.write_all(&buf).expect("io error");
        self.set_meta_u32(FREE_LIST_HEAD_OFF, pgid);
        self.set_meta_u32(FREE_PAGES_IN_HEAD_OFF, PGID_PER_PAGE as u32);
        self.free_standby.clear();
    }

    fn pin_frame(&mut self, pgid: PageId) {
        if pgid >= self.page_num() {
            panic!("accessing page {} >= page_num {}", pgid, self.page_num());
        }
        if self.is_free[pgid as usize] {
            panic!("accessing free page {}", pgid);
        }
        if self.frames.contains_key(&pgid) {
            let frame = self.frames.get_mut(&pgid).unwrap();
            if frame.refcount == 0 {
                self.evictable.retain(|&p| p != pgid);
            }
            let frame = self.frames.get_mut(&pgid).unwrap();
            frame.refcount += 1;
            return;
        }

        let mut frame = if self.frames.len() == self.max_buf_pages {
            self.evict_one()
        } else {
            Frame::new()
        };
        frame.refcount = 1;
        frame.dirty = false;
        self.file
            .seek(SeekFrom::Start(pgid as u64 * PAGE_SIZE as u64))
            .expect("io error");
        self.file.read_exact(&mut frame.buf).expect("io error");
        self.frames.insert(pgid, frame);
    }

    // Evict the page that has been unpinned for the longest time and hand
    // its buffer over for reuse.
    fn evict_one(&mut self) -> Frame {
        if self.evictable.is_empty() {
            panic!("buffer pool is too small: all {} frames pinned", self.max_buf_pages);
        }
        let victim = self.evictable.remove(0);
        let frame = self.frames.remove(&victim).unwrap();
        assert!(frame.refcount == 0);
        if frame.dirty {
            self.file
                .seek(SeekFrom::Start(victim as u64 * PAGE_SIZE as u64))
                .expect("io error");
            self.file.write_all(&frame.buf).expect("io error");
        }
        debug!("evict page {}", victim);
        frame
    }

    fn unpin_frame(&mut self, pgid: PageId) {
        let frame = self
            .frames
            .get_mut(&pgid)
            .unwrap_or_else(|| panic!("unpinning unknown page {}", pgid));
        assert!(frame.refcount > 0, "refcount underflow on page {}", pgid);
        frame.refcount -= 1;
        if frame.refcount == 0 {
            self.evictable.push(pgid);
        }
    }

    fn shrink_to_fit(&mut self) -> Result<(), WrenError> {
        let mut free_pages: Vec<PageId> = Vec::new();
        free_pages.append(&mut self.free_main);
        free_pages.append(&mut self.free_standby);

        // Collect the on-disk chain. During runtime every chain page is
        // full, and the chain pages themselves are free storage.
        let mut pgid = self.meta_u32(FREE_LIST_HEAD_OFF);
        while pgid != 0 {
            free_pages.push(pgid);
            let (ids, next) = self.read_free_list_page(pgid, PGID_PER_PAGE)?;
            free_pages.extend(ids);
            pgid = next;
        }
        free_pages.sort_unstable();

        // Truncate trailing free pages.
        let mut last_page = self.page_num() - 1;
        while last_page > 0 {
            if free_pages.last() != Some(&last_page) {
                break;
            }
            free_pages.pop();
            last_page -= 1;
        }
        let page_num = last_page + 1;
        self.set_meta_u32(PAGE_NUM_OFF, page_num);
        self.is_free.truncate(page_num as usize);
        self.file.set_len(page_num as u64 * PAGE_SIZE as u64)?;

        // Rebuild the free list: full chunks go to on-disk chain pages
        // (taken from the free pages themselves), the remainder stays in
        // the in-memory main buffer.
        self.set_meta_u32(FREE_LIST_HEAD_OFF, 0);
        let mut i = 0;
        while free_pages.len() - i > PGID_PER_PAGE {
            let chain_pgid = free_pages[i];
            i += 1;
            let mut buf = vec![0u8; PAGE_SIZE];
            for (j, id) in free_pages[i..i + PGID_PER_PAGE].iter().enumerate() {
                buf[j * 4..j * 4 + 4].copy_from_slice(&id.to_le_bytes());
            }
            i += PGID_PER_PAGE;
            let head = self.meta_u32(FREE_LIST_HEAD_OFF);
            buf[PAGE_SIZE - 4..].copy_from_slice(&head.to_le_bytes());
            self.file
                .seek(SeekFrom::Start(chain_pgid as u64 * PAGE_SIZE as u64))?;
            self.file.write_all(&buf)?;
            self.set_meta_u32(FREE_LIST_HEAD_OFF, chain_pgid);
            self.set_meta_u32(FREE_PAGES_IN_HEAD_OFF, PGID_PER_PAGE as u32);
        }
        self.free_main = free_pages.split_off(i);
        Ok(())
    }
}

impl Drop for PageStore {
    fn drop(&mut self) {
        // Flush the standby free-list buffer.
        if !self.free_standby.is_empty() {
            if let Some(pgid) = self.free_main.pop() {
                self.flush_free_list_standby(pgid);
            } else {
                std::mem::swap(&mut self.free_main, &mut self.free_standby);
            }
        }
        // Flush the main free-list buffer to one of its own pages.
        if let Some(pgid) = self.free_main.pop() {
            let mut buf = vec![0u8; PAGE_SIZE];
            for (i, id) in self.free_main.iter().enumerate() {
                buf[i * 4..i * 4 + 4].copy_from_slice(&id.to_le_bytes());
            }
            let head = self.meta_u32(FREE_LIST_HEAD_OFF);
            buf[PAGE_SIZE - 4..].copy_from_slice(&head.to_le_bytes());
            let _ = self
                .file
                .seek(SeekFrom::Start(pgid as u64 * PAGE_SIZE as u64))
                .and_then(|_| self.file.write_all(&buf));
            let in_head = self.free_main.len() as u32;
            self.free_main.clear();
            self.set_meta_u32(FREE_LIST_HEAD_OFF, pgid);
            self.set_meta_u32(FREE_PAGES_IN_HEAD_OFF, in_head);
        }

        // Flush dirty frames. By now every handle must have been dropped.
        self.frames.get_mut(&META_PAGE_ID).unwrap().refcount = 0;
        let mut pages: Vec<PageId> = self.frames.keys().cloned().collect();
        pages.sort_unstable();
        for pgid in pages {
            let frame = &self.frames[&pgid];
            if frame.refcount != 0 && !std::thread::panicking() {
                panic!("page {} still referenced at close", pgid);
            }
            if frame.dirty {
                let buf = frame.buf.clone();
                let _ = self
                    .file
                    .seek(SeekFrom::Start(pgid as u64 * PAGE_SIZE as u64))
                    .and_then(|_| self.file.write_all(&buf));
            }
        }
    }
}

/// Handle to a page interpreted as raw bytes. Dropping the handle unpins
/// the underlying buffer frame.
pub struct PlainPage {
    pgid: PageId,
    pgm: PageManager,
}

impl PlainPage {
    pub fn id(&self) -> PageId {
        self.pgid
    }

    pub fn read(&self, start: usize, len: usize) -> Vec<u8> {
        self.pgm
            .with_frame(self.pgid, false, |buf| buf[start..start + len].to_vec())
    }

    pub fn write(&self, start: usize, data: &[u8]) {
        self.pgm.with_frame(self.pgid, true, |buf| {
            buf[start..start + data.len()].copy_from_slice(data)
        })
    }

    pub fn read_u32(&self, start: usize) -> u32 {
        let b = self.read(start, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn write_u32(&self, start: usize, v: u32) {
        self.write(start, &v.to_le_bytes());
    }

    pub fn read_u64(&self, start: usize) -> u64 {
        let b = self.read(start, 8);
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    pub fn write_u64(&self, start: usize, v: u64) {
        self.write(start, &v.to_le_bytes());
    }
}

impl Drop for PlainPage {
    fn drop(&mut self) {
        self.pgm.unpin(self.pgid);
    }
}

/// Handle to a page in the slotted sorted-page format. All slot
/// operations go through the page manager's latch; mutating operations
/// mark the frame dirty.
pub struct SortedPage {
    pgid: PageId,
    pgm: PageManager,
    cmp: SlotCmp,
}

impl SortedPage {
    pub fn id(&self) -> PageId {
        self.pgid
    }

    /// Initialize an empty page with a special region of the given size.
    pub fn init(&self, special_size: usize) {
        self.pgm
            .with_frame(self.pgid, true, |buf| sorted_page::init(buf, special_size))
    }

    pub fn slot_num(&self) -> u16 {
        self.pgm
            .with_frame(self.pgid, false, |buf| sorted_page::slot_num(buf))
    }

    pub fn is_empty(&self) -> bool {
        self.slot_num() == 0
    }

    pub fn free_space(&self) -> usize {
        self.pgm
            .with_frame(self.pgid, false, |buf| sorted_page::free_space(buf))
    }

    pub fn is_insertable(&self, slot: &[u8]) -> bool {
        self.free_space() >= slot.len() + 2
    }

    pub fn usable_space(&self) -> usize {
        self.pgm
            .with_frame(self.pgid, false, |buf| sorted_page::usable_space(buf))
    }

    pub fn used_space(&self) -> usize {
        self.pgm.with_frame(self.pgid, false, |buf| {
            sorted_page::usable_space(buf) - sorted_page::free_space(buf)
        })
    }

    pub fn slot(&self, i: u16) -> Vec<u8> {
        self.pgm
            .with_frame(self.pgid, false, |buf| sorted_page::slot(buf, i).to_vec())
    }

    pub fn slots(&self) -> Vec<Vec<u8>> {
        self.pgm.with_frame(self.pgid, false, |buf| {
            (0..sorted_page::slot_num(buf))
                .map(|i| sorted_page::slot(buf, i).to_vec())
                .collect()
        })
    }

    pub fn lower_bound(&self, key: &[u8]) -> u16 {
        let cmp = self.cmp;
        self.pgm
            .with_frame(self.pgid, false, |buf| sorted_page::lower_bound(buf, cmp, key))
    }

    pub fn upper_bound(&self, key: &[u8]) -> u16 {
        let cmp = self.cmp;
        self.pgm
            .with_frame(self.pgid, false, |buf| sorted_page::upper_bound(buf, cmp, key))
    }

    pub fn find(&self, key: &[u8]) -> Option<u16> {
        let cmp = self.cmp;
        self.pgm
            .with_frame(self.pgid, false, |buf| sorted_page::find(buf, cmp, key))
    }

    pub fn find_slot(&self, key: &[u8]) -> Option<Vec<u8>> {
        let cmp = self.cmp;
        self.pgm.with_frame(self.pgid, false, |buf| {
            sorted_page::find(buf, cmp, key).map(|i| sorted_page::slot(buf, i).to_vec())
        })
    }

    pub fn append_unchecked(&self, slot: &[u8]) {
        self.pgm
            .with_frame(self.pgid, true, |buf| sorted_page::append_unchecked(buf, slot))
    }

    pub fn insert_before(&self, i: u16, slot: &[u8]) -> bool {
        self.pgm
            .with_frame(self.pgid, true, |buf| sorted_page::insert_before(buf, i, slot))
    }

    pub fn replace_slot(&self, i: u16, slot: &[u8]) -> bool {
        self.pgm
            .with_frame(self.pgid, true, |buf| sorted_page::replace_slot(buf, i, slot))
    }

    pub fn delete_slot(&self, i: u16) {
        self.pgm
            .with_frame(self.pgid, true, |buf| sorted_page::delete_slot(buf, i))
    }

    pub fn delete_by_key(&self, key: &[u8]) -> bool {
        let cmp = self.cmp;
        self.pgm
            .with_frame(self.pgid, true, |buf| sorted_page::delete_by_key(buf, cmp, key))
    }

    pub fn read_special(&self, start: usize, len: usize) -> Vec<u8> {
        self.pgm.with_frame(self.pgid, false, |buf| {
            sorted_page::read_special(buf, start, len).to_vec()
        })
    }

    pub fn write_special(&self, start: usize, data: &[u8]) {
        self.pgm
            .with_frame(self.pgid, true, |buf| sorted_page::write_special(buf, start, data))
    }

    pub fn read_special_u32(&self, start: usize) -> u32 {
        let b = self.read_special(start, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn write_special_u32(&self, start: usize, v: u32) {
        self.write_special(start, &v.to_le_bytes());
    }

    /// Logically insert `slot` before position `i`, then move the upper
    /// half of the slots into `right` (an initialized empty page).
    /// Returns false if no split can make both halves fit.
    pub fn split_insert(&self, right: &SortedPage, slot: &[u8], i: u16) -> bool {
        self.pgm.with_two_frames(self.pgid, right.pgid, |l, r| {
            sorted_page::split_insert(l, r, slot, i)
        })
    }

    /// Like `split_insert`, but the slot at position `i` is replaced
    /// instead of prepended.
    pub fn split_replace(&self, right: &SortedPage, slot: &[u8], i: u16) -> bool {
        self.pgm.with_two_frames(self.pgid, right.pgid, |l, r| {
            sorted_page::split_replace(l, r, slot, i)
        })
    }
}

impl Drop for SortedPage {
    fn drop(&mut self) {
        self.pgm.unpin(self.pgid);
    }
}
