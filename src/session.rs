use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLockStatus {
    Locked,
    Unlocked,
    Unknown,
    NotSupported,
}

/// Probes whether the interactive session is currently locked.
///
/// On Windows the input desktop is unreachable while the secure desktop is
/// up, which is exactly the situation that kills low-level keyboard hooks.
#[cfg(target_os = "windows")]
pub fn session_lock_status() -> SessionLockStatus {
    use windows_sys::Win32::System::StationsAndDesktops::{
        CloseDesktop, DESKTOP_READOBJECTS, OpenInputDesktop,
    };

    unsafe {
        let desktop = OpenInputDesktop(0, 0, DESKTOP_READOBJECTS);
        if desktop.is_null() {
            SessionLockStatus::Locked
        } else {
            CloseDesktop(desktop);
            SessionLockStatus::Unlocked
        }
    }
}

#[cfg(not(target_os = "windows"))]
pub fn session_lock_status() -> SessionLockStatus {
    SessionLockStatus::NotSupported
}

pub trait SessionProvider: Send + 'static {
    fn lock_status(&self) -> SessionLockStatus;
}

struct NativeSessionProvider;

impl SessionProvider for NativeSessionProvider {
    fn lock_status(&self) -> SessionLockStatus {
        session_lock_status()
    }
}

pub struct SessionWatch {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl SessionWatch {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Starts a polling watcher that reports lock/unlock transitions. Returns
/// `None` when the platform cannot report session state at all.
pub fn spawn_session_watch(
    notifier: impl Fn(SessionLockStatus) + Send + 'static,
) -> Option<SessionWatch> {
    spawn_session_watch_internal(notifier, NativeSessionProvider, SESSION_POLL_INTERVAL)
}

fn spawn_session_watch_internal(
    notifier: impl Fn(SessionLockStatus) + Send + 'static,
    provider: impl SessionProvider,
    poll_interval: Duration,
) -> Option<SessionWatch> {
    let initial = provider.lock_status();
    if matches!(initial, SessionLockStatus::NotSupported) {
        return None;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = std::thread::spawn(move || {
        let mut last = initial;

        while !stop_flag.load(Ordering::Relaxed) {
            std::thread::sleep(poll_interval);
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }

            let status = provider.lock_status();
            if matches!(
                status,
                SessionLockStatus::Unknown | SessionLockStatus::NotSupported
            ) {
                continue;
            }
            if status != last {
                last = status;
                notifier(status);
            }
        }
    });

    Some(SessionWatch {
        handle: Some(handle),
        stop,
    })
}
