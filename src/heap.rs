use std::mem::size_of;
use std::ptr::null_mut;

use crate::block_allocator::{CellAllocator, BLOCK_CAPACITY};
use crate::cell::{self, cell_object, ByteData, MemCell};
use crate::error::{exit_failure_sink, FailureSink, InitError, RuntimeError};
use crate::frame::FuncFrame;
use crate::free_cells::FreeCells;
use crate::header::{Color, Object};

/// Counters kept across collection cycles.
#[derive(Clone, Copy, Debug, Default)]
pub struct GcStats {
    /// Cycles started since init.
    pub cycles: usize,
    /// Cells reclaimed since init.
    pub cells_swept: usize,
    /// Cells reclaimed by the most recent sweep.
    pub last_swept: usize,
    /// Non-null heap root slots seen by the most recent root scan.
    pub last_roots: usize,
}

/// Cell population of the three live treadmill regions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionCounts {
    pub from: usize,
    pub to: usize,
    pub new: usize,
}

/// The managed heap: cell allocator, free pool, and the treadmill ring with
/// its three cursors.
///
/// The ring is one circular doubly-linked list anchored by two permanently
/// empty sentinel cells, `bottom` and `new_edge`. In `next` direction it
/// reads `bottom`, from-region, to-region, new-region, `new_edge`, back to
/// `bottom`. `top` points at the from-region tail and `scan` at the
/// to-region tail; between cycles both rest on `new_edge.prev` with the to-
/// and new-regions empty. Objects change region by re-splicing, never by
/// copying, so payload addresses are stable for the payload's lifetime.
///
/// Collection is driven by allocation pressure: the cell allocator chaining
/// in a new block starts a cycle (colour flip plus root scan), every
/// subsequent allocation scans one grey object, and the allocation that
/// drains the worklist sweeps the remaining from-region into the free pool.
///
/// One manager is instanced per runtime; nothing here is shared or locked.
pub struct MemManager {
    cell_allocator: CellAllocator,
    free_cells: FreeCells,
    bottom: *mut MemCell,
    new_edge: *mut MemCell,
    top: *mut MemCell,
    scan: *mut MemCell,
    gc_in_progress: bool,
    live_color: Color,
    stats: GcStats,
    failure_sink: FailureSink,
}

impl MemManager {
    pub fn new() -> Result<Self, InitError> {
        Self::with_block_capacity(BLOCK_CAPACITY)
    }

    /// Manager whose cell blocks hold `block_capacity` cells each. Small
    /// capacities make collection pressure easy to provoke in tests.
    pub fn with_block_capacity(block_capacity: usize) -> Result<Self, InitError> {
        let cell_allocator = CellAllocator::new(block_capacity)?;
        unsafe {
            let bottom = libc::malloc(size_of::<MemCell>()) as *mut MemCell;
            if bottom.is_null() {
                return Err(InitError::FreeCells);
            }
            bottom.write(MemCell::empty());
            let new_edge = libc::malloc(size_of::<MemCell>()) as *mut MemCell;
            if new_edge.is_null() {
                libc::free(bottom as *mut libc::c_void);
                return Err(InitError::Manager);
            }
            new_edge.write(MemCell::empty());
            (*bottom).next = new_edge;
            (*bottom).prev = new_edge;
            (*new_edge).next = bottom;
            (*new_edge).prev = bottom;
            Ok(Self {
                cell_allocator,
                free_cells: FreeCells::new(),
                bottom,
                new_edge,
                top: bottom,
                scan: bottom,
                gc_in_progress: false,
                live_color: Color::White,
                stats: GcStats::default(),
                failure_sink: exit_failure_sink,
            })
        }
    }

    #[inline]
    pub fn live_color(&self) -> Color {
        self.live_color
    }

    #[inline]
    pub fn gc_in_progress(&self) -> bool {
        self.gc_in_progress
    }

    #[inline]
    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn free_pool_len(&self) -> usize {
        self.free_cells.len()
    }

    /// Whether the free pool holds a cell whose last payload had `size`
    /// bytes, i.e. whether the next allocation of `size` avoids `malloc`.
    pub fn free_pool_has_size(&self, size: usize) -> bool {
        let mut found = false;
        self.free_cells.for_each(|cell| unsafe {
            if (*cell).size == size {
                found = true;
            }
        });
        found
    }

    pub fn block_count(&self) -> usize {
        self.cell_allocator.block_count()
    }

    /// Whether `object` carries this cycle's live colour.
    ///
    /// # Safety
    /// `object` must point at an initialised object header.
    pub unsafe fn object_is_alive(&self, object: *const Object) -> bool {
        (*object).is_alive(self.live_color)
    }

    pub fn set_failure_sink(&mut self, sink: FailureSink) {
        self.failure_sink = sink;
    }

    /// Report an unrecoverable failure through the installed sink.
    pub fn fail(&self, err: RuntimeError) -> ! {
        (self.failure_sink)(&err)
    }

    /// Allocate a payload of exactly `size` bytes and hand it to the
    /// mutator. Returns null when cell, block or payload allocation fails.
    ///
    /// This is the collector's only scheduling point: chaining in a fresh
    /// cell block starts a cycle, each call performs one unit of scan work,
    /// and the call that finds the worklist drained sweeps before handing
    /// the payload out. While a cycle runs, fresh cells join the new-region
    /// and stay opaque until the next cycle; otherwise they join the
    /// from-region head.
    ///
    /// # Safety
    /// `frame` must head a live frame chain whose root tables cover every
    /// managed local of the caller, transitively.
    pub unsafe fn alloc_object(&mut self, frame: *const FuncFrame, size: usize) -> *mut u8 {
        let mut cell = self.free_cells.pop(size);
        if cell.is_null() {
            let mut grew = false;
            cell = self.cell_allocator.alloc(&mut grew);
            if cell.is_null() {
                return null_mut();
            }
            if grew && !self.gc_in_progress {
                self.begin_cycle(frame);
            }
            let data = ByteData::alloc(size);
            if data.is_null() {
                return null_mut();
            }
            (*data).owner_cell = cell;
            (*cell).size = size;
            (*cell).data = data;
        }
        debug_assert_eq!((*(*cell).data).owner_cell, cell);

        let still_scanning = self.mark_step();
        if still_scanning && self.gc_in_progress {
            self.splice_into_new(cell);
        } else {
            if self.gc_in_progress {
                self.finish_cycle();
            }
            self.splice_into_from(cell);
        }
        ByteData::payload((*cell).data)
    }

    /// Run a full collection: start a cycle unless one is under way, drain
    /// the scan worklist, sweep. Back-to-back calls are idempotent with
    /// respect to the live set.
    ///
    /// # Safety
    /// Same rooting requirements as [`MemManager::alloc_object`].
    pub unsafe fn gc_start(&mut self, frame: *const FuncFrame) {
        if !self.gc_in_progress {
            self.begin_cycle(frame);
        }
        while self.mark_step() {}
        self.finish_cycle();
        // No allocation is in flight here, so the partition is checkable.
        #[cfg(debug_assertions)]
        self.verify_invariants();
    }

    /// Enqueue one object for scanning: unlink its cell, set grey, splice it
    /// onto the to-region worklist. No-op for null, non-heap, already-grey
    /// or already-alive objects, so hooks may call this unconditionally for
    /// every pointer field.
    ///
    /// # Safety
    /// `object` must be null or an initialised object owned by this manager.
    pub unsafe fn mark_object(&mut self, object: *mut Object) {
        if object.is_null() {
            return;
        }
        if !(*object).is_heap() {
            return;
        }
        if (*object).is_gray() || (*object).is_alive(self.live_color) {
            return;
        }
        let cell = ByteData::owner_of(object);
        debug_assert_eq!(cell_object(cell), object);
        // Only from-region cells get this far; keep the cursors on the
        // from-tail if the target happens to sit there.
        if self.top == cell {
            self.top = (*cell).prev;
        }
        if self.scan == cell {
            self.scan = (*cell).prev;
        }
        cell::unlink(cell);
        (*object).set_gray(true);
        let was_empty = self.scan == self.top;
        cell::insert_after(cell, self.top);
        if was_empty {
            self.scan = cell;
        }
    }

    /// Flip the live colour and seed the worklist from every root table in
    /// the frame chain. Null slots and static (non-heap) roots are skipped.
    unsafe fn begin_cycle(&mut self, frame: *const FuncFrame) {
        debug_assert!(!self.gc_in_progress);
        self.live_color = self.live_color.flip();
        self.gc_in_progress = true;
        self.stats.cycles += 1;
        let mut roots = 0usize;
        let mut current = frame;
        while !current.is_null() {
            let table = (*current).root_table;
            for i in 0..(*current).root_table_size {
                let object = *table.add(i);
                if !object.is_null() && (*object).is_heap() {
                    roots += 1;
                }
                self.mark_object(object);
            }
            current = (*current).parent;
        }
        self.stats.last_roots = roots;
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            cycle = self.stats.cycles,
            roots,
            color = ?self.live_color,
            "marking begins"
        );
    }

    /// One unit of scan work. Returns false once the worklist is drained,
    /// which tells the caller this cycle is ready to sweep.
    unsafe fn mark_step(&mut self) -> bool {
        if self.scan == self.top {
            return false;
        }
        let cell = self.scan;
        let object = cell_object(cell);
        if (*object).is_gray() {
            let type_info = (*object).type_info;
            debug_assert!(!type_info.is_null());
            if let Some(scan_fn) = (*type_info).scan {
                scan_fn(self as *mut Self, object);
            }
            (*object).set_gray(false);
            (*object).set_alive(self.live_color);
        }
        // Children enqueued by the hook land between `top` and this cell,
        // so walking prev-ward visits them before the cursor reaches `top`.
        self.scan = (*cell).prev;
        true
    }

    /// Reclaim everything still in the from-region, then fuse the scanned
    /// cells and this cycle's newborns into the from-region of the next.
    unsafe fn finish_cycle(&mut self) {
        debug_assert!(self.gc_in_progress);
        debug_assert!(self.scan == self.top);
        let mut swept = 0usize;
        while self.top != self.bottom {
            let cell = self.top;
            let prev = (*cell).prev;
            cell::unlink(cell);
            let object = cell_object(cell);
            debug_assert!((*object).is_heap());
            let type_info = (*object).type_info;
            if !type_info.is_null() {
                if let Some(heap_free) = (*type_info).heap_free {
                    heap_free(object);
                }
            }
            (*object).reset();
            self.free_cells.push(cell);
            swept += 1;
            self.top = prev;
        }
        self.top = (*self.new_edge).prev;
        self.scan = self.top;
        self.gc_in_progress = false;
        self.stats.cells_swept += swept;
        self.stats.last_swept = swept;
        #[cfg(feature = "gc_logging")]
        tracing::debug!(cycle = self.stats.cycles, swept, "cycle complete");
    }

    unsafe fn splice_into_new(&mut self, cell: *mut MemCell) {
        cell::insert_before(cell, self.new_edge);
    }

    unsafe fn splice_into_from(&mut self, cell: *mut MemCell) {
        cell::insert_after(cell, self.bottom);
        // First cell after init or a total sweep becomes the from-tail.
        if self.top == self.bottom {
            self.top = cell;
        }
        if self.scan == self.bottom {
            self.scan = cell;
        }
    }

    /// Count the cells in each treadmill region. Only meaningful between
    /// allocations.
    pub fn region_counts(&self) -> RegionCounts {
        unsafe {
            let mut counts = RegionCounts::default();
            if self.top != self.bottom {
                let mut cell = (*self.bottom).next;
                loop {
                    counts.from += 1;
                    if cell == self.top {
                        break;
                    }
                    cell = (*cell).next;
                }
            }
            if self.scan != self.top {
                let mut cell = (*self.top).next;
                loop {
                    counts.to += 1;
                    if cell == self.scan {
                        break;
                    }
                    cell = (*cell).next;
                }
            }
            let mut cell = (*self.scan).next;
            while cell != self.new_edge {
                counts.new += 1;
                cell = (*cell).next;
            }
            counts
        }
    }

    /// Walk the whole heap and panic on any violated structural invariant:
    /// ring closure, region partition, payload back-pointers, colour/region
    /// correspondence, reset state of pooled cells.
    pub fn verify_invariants(&self) {
        unsafe {
            assert_eq!((*self.new_edge).next, self.bottom, "free side must stay empty");
            assert_eq!((*self.bottom).prev, self.new_edge);
            assert!((*self.bottom).data.is_null());
            assert!((*self.new_edge).data.is_null());

            let counts = self.region_counts();
            let ring_cells = counts.from + counts.to + counts.new;
            assert_eq!(
                ring_cells + self.free_cells.len(),
                self.cell_allocator.cells_in_use(),
                "regions and free pool must partition the cells"
            );

            if self.top != self.bottom {
                let mut cell = (*self.bottom).next;
                loop {
                    self.check_back_pointer(cell);
                    let object = cell_object(cell);
                    assert!(!(*object).is_gray(), "grey cell in from-region");
                    if self.gc_in_progress {
                        assert!(
                            !(*object).is_alive(self.live_color),
                            "marked cell left in from-region"
                        );
                    }
                    if cell == self.top {
                        break;
                    }
                    cell = (*cell).next;
                }
            }
            if self.scan != self.top {
                let mut cell = (*self.top).next;
                loop {
                    self.check_back_pointer(cell);
                    assert!((*cell_object(cell)).is_gray(), "non-grey cell in to-region");
                    if cell == self.scan {
                        break;
                    }
                    cell = (*cell).next;
                }
            }
            let mut cell = (*self.scan).next;
            while cell != self.new_edge {
                self.check_back_pointer(cell);
                assert!(!(*cell_object(cell)).is_gray(), "grey cell in new-region");
                cell = (*cell).next;
            }
        }

        self.free_cells.for_each(|cell| unsafe {
            assert!(!(*cell).data.is_null(), "pooled cell lost its buffer");
            let object = cell_object(cell);
            assert!(!(*object).is_heap(), "pooled cell not reset");
        });
    }

    unsafe fn check_back_pointer(&self, cell: *mut MemCell) {
        assert!(!(*cell).data.is_null(), "region cell without payload");
        assert_eq!(
            (*(*cell).data).owner_cell,
            cell,
            "payload back-pointer does not match its cell"
        );
    }
}

impl Drop for MemManager {
    fn drop(&mut self) {
        unsafe {
            // Ring cells still hold live objects; run their hooks before the
            // buffers go.
            let mut cell = (*self.bottom).next;
            while cell != self.bottom {
                let next = (*cell).next;
                if cell != self.new_edge {
                    let data = (*cell).data;
                    if !data.is_null() {
                        let object = ByteData::payload(data) as *mut Object;
                        if (*object).is_heap() {
                            let type_info = (*object).type_info;
                            if !type_info.is_null() {
                                if let Some(heap_free) = (*type_info).heap_free {
                                    heap_free(object);
                                }
                            }
                        }
                        ByteData::free(data);
                    }
                }
                cell = next;
            }
            // Pooled cells already ran their hooks at sweep.
            let mut cell = self.free_cells.take_head();
            while !cell.is_null() {
                let next = (*cell).next;
                ByteData::free((*cell).data);
                cell = next;
            }
            libc::free(self.bottom as *mut libc::c_void);
            libc::free(self.new_edge as *mut libc::c_void);
            // Cell blocks are released by the allocator's own Drop.
        }
    }
}
