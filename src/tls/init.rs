//! Process-wide TLS library initialization
//!
//! Each `TlsLibrary` owns exactly one `CryptoLibraryState`, created lazily by
//! the first call to [`global_context`] from any thread and never torn down.
//! Construction runs the library's startup routine and registers the
//! locking and thread-identity callbacks, so it happens-before any context
//! or session of that library is created.
//!
//! The callbacks must not be invoked by the library while the state is
//! still being constructed on the same thread.

use super::library::TlsLibrary;
use libc::{c_char, c_int, c_ulong};
use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

pub const CRYPTO_LOCK: c_int = 1;
pub const CRYPTO_UNLOCK: c_int = 2;
pub const CRYPTO_READ: c_int = 4;
pub const CRYPTO_WRITE: c_int = 8;

/// Legacy locking callback: `(mode, slot, file, line)`
///
/// Unsafe to call: an unlock must come from the thread that took the slot.
pub type LockingCallback = unsafe extern "C" fn(c_int, c_int, *const c_char, c_int);

/// Legacy thread-identity callback
pub type ThreadIdCallback = extern "C" fn() -> c_ulong;

/// Process-wide state of one TLS library
pub struct CryptoLibraryState {
    locks: Box<[RawMutex]>,
}

impl CryptoLibraryState {
    fn new<L: TlsLibrary>() -> Self {
        let locks: Box<[RawMutex]> = (0..L::num_locks()).map(|_| RawMutex::INIT).collect();

        L::startup();
        L::set_callbacks(locking_function::<L>, id_function);

        log::debug!("TLS library initialized with {} lock slots", locks.len());

        CryptoLibraryState { locks }
    }

    /// Number of lock slots
    pub fn num_locks(&self) -> usize {
        self.locks.len()
    }

    /// Acquire slot `n` when `mode` has `CRYPTO_LOCK` set, release it otherwise
    ///
    /// # Safety
    ///
    /// A release must come from the thread that currently holds slot `n`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is not a valid slot index.
    pub(crate) unsafe fn locking(&self, mode: c_int, n: c_int) {
        let lock = usize::try_from(n)
            .ok()
            .and_then(|slot| self.locks.get(slot))
            .unwrap_or_else(|| {
                panic!("lock slot {} out of range ({} slots)", n, self.locks.len())
            });

        if mode & CRYPTO_LOCK != 0 {
            lock.lock();
        } else {
            // SAFETY: the caller holds slot `n`
            unsafe { lock.unlock() };
        }
    }

    /// Stable identifier of the calling thread
    pub fn thread_id(&self) -> c_ulong {
        id_function()
    }
}

/// The process-wide state of `L`, initializing it on first use
pub fn global_context<L: TlsLibrary>() -> &'static CryptoLibraryState {
    L::state_cell().get_or_init(CryptoLibraryState::new::<L>)
}

/// Locking callback handed to `L`
///
/// An out-of-range slot aborts the process.
///
/// # Safety
///
/// Only the thread holding slot `n` may release it. The library upholds
/// this by pairing every unlock with its own earlier lock.
pub unsafe extern "C" fn locking_function<L: TlsLibrary>(
    mode: c_int,
    n: c_int,
    _file: *const c_char,
    _line: c_int,
) {
    global_context::<L>().locking(mode, n);
}

/// Thread-identity callback handed to the library
pub extern "C" fn id_function() -> c_ulong {
    unsafe { libc::pthread_self() as c_ulong }
}
