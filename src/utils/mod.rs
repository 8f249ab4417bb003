use std::{
    io::Write,
    sync::{Once, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

static INIT_LOG: Once = Once::new();

/// Set up the logger. Safe to call multiple times, only the first call
/// takes effect. Controlled by RUST_LOG as usual.
pub fn init_log() {
    INIT_LOG.call_once(|| {
        use env_logger::Builder;

        let mut builder = Builder::from_default_env();

        builder
            .is_test(true)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}

/// copy from https://github.com/tikv/tikv/blob/b15ea3b1cd766375cb52019e35c195ed797124df/components/tikv_util/src/lib.rs#L171-L186
///
/// A handy shortcut to replace `RwLock` write/read().unwrap() pattern
/// to shortcut wl and rl.
pub trait HandyRwLock<T: ?Sized> {
    fn wl(&self) -> RwLockWriteGuard<'_, T>;
    fn rl(&self) -> RwLockReadGuard<'_, T>;
}

impl<T: ?Sized> HandyRwLock<T> for RwLock<T> {
    fn wl(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap()
    }

    fn rl(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap()
    }
}
