//! A stop-the-world copying collector for a tagged-word heap.
//!
//! Every heap word is a [`LispObj`]: a fixnum, an immediate, a header, or
//! a pointer whose low three bits say what kind of object it refers to.
//! A collection flips every dynamic region into from-space, copies what
//! is reachable from the roots (handles, static space, thread stacks and
//! saved register contexts), scans the copies Cheney-style until nothing
//! new turns up, then resolves weak pointers and weak hash tables before
//! releasing from-space.
//!
//! ```no_run
//! use tagged_gc::{Heap, LispObj, NIL};
//!
//! let mut heap = Heap::new()?;
//! let list = heap.list(&[LispObj::fixnum(1), LispObj::fixnum(2)])?;
//! let root = heap.acquire_handle(list);
//! let stats = heap.collect(&mut []);
//! assert_eq!(stats.objects_copied, 2);
//! assert_ne!(heap.get_handle(&root), NIL);
//! # Ok::<(), tagged_gc::GcError>(())
//! ```

mod alloc;
pub mod code;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod gc;
pub mod hash_table;
pub mod heap;
pub mod layout;
pub mod roots;
mod search;
pub mod tag_ptr;
pub mod thread;
mod transport;
mod weak;
pub mod widetag;

pub use code::{IcacheFlusher, LoggingFlusher};
pub use config::GcConfig;
pub use dispatch::{init_dispatch_tables, DispatchTables};
pub use error::GcError;
pub use forward::ObjectState;
pub use gc::{Collector, GcStats};
pub use hash_table::Weakness;
pub use heap::{Handle, Heap, HeapMeta, PageKind, RegionKind, EMPTY_HASH_SLOT, NIL, T};
pub use roots::RootSlot;
pub use tag_ptr::{Address, LispObj, PointerKind, Word};
pub use thread::{CallInfo, RegisterFile, RegisterId, RegisterLayout, ThreadState};
