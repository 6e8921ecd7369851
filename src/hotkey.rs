use anyhow::{Context, Result, anyhow};
use global_hotkey::GlobalHotKeyManager;
use global_hotkey::hotkey::HotKey;

/// Seam between the Activation Controller and the platform hotkey service.
///
/// At most one registration exists at a time; `register` always clears any
/// prior registration first.
pub trait HotkeyBackend {
    fn register(&mut self, shortcut: &str) -> Result<u32>;
    fn unregister_all(&mut self);
}

pub struct GlobalHotkeyBackend {
    manager: GlobalHotKeyManager,
    current: Option<HotKey>,
}

impl GlobalHotkeyBackend {
    pub fn new() -> Result<Self> {
        let manager =
            GlobalHotKeyManager::new().context("failed to initialize global hotkey manager")?;
        Ok(Self {
            manager,
            current: None,
        })
    }
}

impl HotkeyBackend for GlobalHotkeyBackend {
    fn register(&mut self, shortcut: &str) -> Result<u32> {
        self.unregister_all();

        let hotkey: HotKey = shortcut
            .parse()
            .map_err(|err| anyhow!("invalid key combination '{shortcut}': {err}"))?;
        self.manager
            .register(hotkey)
            .with_context(|| format!("platform refused hotkey '{shortcut}'"))?;

        self.current = Some(hotkey);
        Ok(hotkey.id())
    }

    fn unregister_all(&mut self) {
        // Best effort: a stale registration disappears with the process anyway.
        if let Some(hotkey) = self.current.take() {
            let _ = self.manager.unregister(hotkey);
        }
    }
}
