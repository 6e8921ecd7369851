use anyhow::{Context, Result, anyhow};
use discord_message_shortcut::config::{ConfigStore, FIELDS, FieldKey, preview_value};
use discord_message_shortcut::controller::{
    ActivationController, ControllerEvent, EditOutcome, ToggleOutcome,
};
use discord_message_shortcut::hotkey::GlobalHotkeyBackend;
use discord_message_shortcut::paths::{default_config_path, default_send_log_path};
use discord_message_shortcut::send_log::SendLog;
use discord_message_shortcut::sender::DiscordSender;
use discord_message_shortcut::session::{SessionLockStatus, spawn_session_watch};
use discord_message_shortcut::supervisor::{self, AUTOSTART_FLAG, SupervisorConfig};
use global_hotkey::{GlobalHotKeyEvent, HotKeyState};
use opener::open;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tao::event::{Event, StartCause};
use tao::event_loop::{ControlFlow, EventLoopBuilder};
use tokio::sync::mpsc;
use tray_icon::menu::{Menu, MenuEvent, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

const CHILD_FLAG: &str = "--child";
const RELAUNCH_DELAY_FLAG: &str = "--relaunch-delay";

#[derive(Debug)]
enum UserEvent {
    Menu(MenuEvent),
    Hotkey(GlobalHotKeyEvent),
    Controller(ControllerEvent),
    Session(SessionLockStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrayState {
    Active,
    Ready,
    Missing,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let restart_exit_code = supervisor::restart_exit_code_from_env();

    if !args.iter().any(|arg| arg == CHILD_FLAG) {
        // Outer supervisor: relaunch the tray child whenever it exits with
        // the reserved code (hotkey hook gone stale, typically after a
        // session unlock).
        let mut child_args = vec![CHILD_FLAG.to_string()];
        if args.iter().any(|arg| arg == AUTOSTART_FLAG) {
            child_args.push(AUTOSTART_FLAG.to_string());
        }
        let code = supervisor::run(&SupervisorConfig {
            restart_exit_code,
            relaunch_delay: parse_relaunch_delay(&args)?,
            child_args,
        })?;
        std::process::exit(code);
    }

    let autostart = args.iter().any(|arg| arg == AUTOSTART_FLAG);
    run_tray(autostart, restart_exit_code)
}

fn parse_relaunch_delay(args: &[String]) -> Result<Duration> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == RELAUNCH_DELAY_FLAG {
            let value = iter
                .next()
                .with_context(|| format!("{RELAUNCH_DELAY_FLAG} needs a value"))?;
            return humantime::parse_duration(value)
                .map_err(|err| anyhow!("invalid relaunch delay '{value}': {err}"));
        }
    }
    Ok(Duration::from_millis(500))
}

fn run_tray(autostart: bool, restart_exit_code: i32) -> Result<()> {
    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();
    let proxy = event_loop.create_proxy();

    let proxy_for_menu = proxy.clone();
    MenuEvent::set_event_handler(Some(move |event| {
        let _ = proxy_for_menu.send_event(UserEvent::Menu(event));
    }));

    let proxy_for_hotkey = proxy.clone();
    GlobalHotKeyEvent::set_event_handler(Some(move |event| {
        let _ = proxy_for_hotkey.send_event(UserEvent::Hotkey(event));
    }));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ControllerEvent>();
    let proxy_for_controller = proxy.clone();
    std::thread::spawn(move || {
        while let Some(event) = event_rx.blocking_recv() {
            if proxy_for_controller
                .send_event(UserEvent::Controller(event))
                .is_err()
            {
                break;
            }
        }
    });

    let proxy_for_session = proxy.clone();
    let _session_watch = spawn_session_watch(move |status| {
        let _ = proxy_for_session.send_event(UserEvent::Session(status));
    });

    let store = ConfigStore::new(default_config_path());
    let hotkeys = GlobalHotkeyBackend::new()?;
    let mut controller = ActivationController::new(
        store,
        Box::new(hotkeys),
        Arc::new(DiscordSender::new()),
        Some(SendLog::new(default_send_log_path())),
        Some(event_tx),
    );

    let status_item = MenuItem::new("Status: Inactive", false, None);
    let field_items: Vec<(FieldKey, &'static str, MenuItem)> = FIELDS
        .iter()
        .map(|spec| {
            (
                spec.key,
                spec.label,
                MenuItem::new(format!("{}: NOT SET", spec.label), false, None),
            )
        })
        .collect();
    let open_config_item = MenuItem::new("Open config file...", true, None);
    let reload_item = MenuItem::new("Reload config", true, None);
    let open_log_item = MenuItem::new("Open send log...", true, None);
    let toggle_item = MenuItem::new("Activate", true, None);
    let send_test_item = MenuItem::new("Send test message", true, None);
    let restart_item = MenuItem::new("Restart (reload keyboard hook)", true, None);
    let quit_item = MenuItem::new("Quit", true, None);

    let menu = Menu::new();
    menu.append(&status_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    for (_, _, item) in &field_items {
        menu.append(item)?;
    }
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&open_config_item)?;
    menu.append(&reload_item)?;
    menu.append(&open_log_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&toggle_item)?;
    menu.append(&send_test_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&restart_item)?;
    menu.append(&quit_item)?;

    let icons = IconSet::new();
    let mut tray_icon: Option<TrayIcon> = None;

    refresh_menu(&controller, &field_items, &toggle_item);
    update_status(&controller, &status_item, &mut tray_icon, &icons, None);

    event_loop.run(move |event, _target, control_flow| {
        *control_flow = ControlFlow::Wait;

        match event {
            Event::NewEvents(StartCause::Init) => {
                if tray_icon.is_none() {
                    let built = TrayIconBuilder::new()
                        .with_menu(Box::new(menu.clone()))
                        .with_tooltip("DMS - Discord Message Shortcut")
                        .with_icon(icons.icon(tray_state(&controller)))
                        .build();

                    match built {
                        Ok(icon) => tray_icon = Some(icon),
                        Err(err) => {
                            status_item.set_text(format!("Status: tray init failed ({err})"));
                        }
                    }
                }

                if autostart {
                    let text = apply_toggle(&mut controller);
                    refresh_menu(&controller, &field_items, &toggle_item);
                    update_status(&controller, &status_item, &mut tray_icon, &icons, Some(text));
                }
            }
            Event::UserEvent(UserEvent::Hotkey(hotkey_event)) => {
                let matches = controller
                    .active_hotkey_id()
                    .is_some_and(|id| hotkey_event.id == id);
                if matches && hotkey_event.state == HotKeyState::Pressed {
                    controller.on_hotkey_triggered();
                }
            }
            Event::UserEvent(UserEvent::Menu(menu_event)) => {
                let mut status_text = None;

                if menu_event.id == toggle_item.id() {
                    status_text = Some(apply_toggle(&mut controller));
                } else if menu_event.id == reload_item.id() {
                    status_text = Some(match controller.reload_config() {
                        EditOutcome::Saved => "Config reloaded".to_string(),
                        EditOutcome::ShortcutRebound => {
                            "Config reloaded, hotkey rebound".to_string()
                        }
                        EditOutcome::Deactivated { reason } => {
                            format!("Config reloaded, deactivated: {reason}")
                        }
                    });
                } else if menu_event.id == open_config_item.id() {
                    status_text = Some(open_path(controller.store().path()));
                } else if menu_event.id == open_log_item.id() {
                    status_text = Some(open_path(&default_send_log_path()));
                } else if menu_event.id == send_test_item.id() {
                    let missing = controller.missing_required_fields();
                    if missing.is_empty() {
                        controller.send_now();
                        status_text = Some("Sending test message...".to_string());
                    } else {
                        status_text =
                            Some(format!("Cannot send, missing: {}", missing.join(", ")));
                    }
                } else if menu_event.id == restart_item.id() {
                    controller.deactivate();
                    *control_flow = ControlFlow::ExitWithCode(restart_exit_code);
                } else if menu_event.id == quit_item.id() {
                    controller.deactivate();
                    *control_flow = ControlFlow::Exit;
                }

                refresh_menu(&controller, &field_items, &toggle_item);
                update_status(&controller, &status_item, &mut tray_icon, &icons, status_text);
            }
            Event::UserEvent(UserEvent::Controller(controller_event)) => {
                let status_text = match controller_event {
                    ControllerEvent::ConfigChanged => None,
                    ControllerEvent::Activated { shortcut } => {
                        Some(format!("Active (hotkey {shortcut})"))
                    }
                    ControllerEvent::Deactivated => Some("Inactive".to_string()),
                    ControllerEvent::ForcedDeactivation { reason } => {
                        Some(format!("Deactivated: {reason}"))
                    }
                    ControllerEvent::SendSucceeded => Some("Message sent".to_string()),
                    ControllerEvent::SendFailed { message } => {
                        Some(format!("Send failed: {message}"))
                    }
                };

                refresh_menu(&controller, &field_items, &toggle_item);
                update_status(&controller, &status_item, &mut tray_icon, &icons, status_text);
            }
            Event::UserEvent(UserEvent::Session(status)) => {
                if status == SessionLockStatus::Unlocked && controller.is_active() {
                    // Keyboard hooks do not survive a lock/unlock cycle.
                    // Hand control back to the supervisor for a clean
                    // relaunch with the hotkey re-armed.
                    status_item.set_text("Status: session unlocked, restarting...");
                    controller.deactivate();
                    *control_flow = ControlFlow::ExitWithCode(restart_exit_code);
                }
            }
            _ => {}
        }
    });
}

fn apply_toggle(controller: &mut ActivationController) -> String {
    match controller.toggle_active() {
        Ok(ToggleOutcome::Activated) => format!(
            "Active (hotkey {})",
            controller.store().get(FieldKey::Shortcut)
        ),
        Ok(ToggleOutcome::Deactivated) => "Inactive".to_string(),
        Ok(ToggleOutcome::MissingConfig { missing }) => {
            format!("Cannot activate, missing: {}", missing.join(", "))
        }
        Err(err) => format!("{err:#}"),
    }
}

fn open_path(path: &Path) -> String {
    // Fall back to the containing directory before the file first exists.
    let target = if path.exists() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    };

    match open(&target) {
        Ok(()) => format!("Opened {}", target.display()),
        Err(err) => format!("Failed to open {}: {err}", target.display()),
    }
}

fn tray_state(controller: &ActivationController) -> TrayState {
    if controller.is_active() {
        TrayState::Active
    } else if controller.is_ready() {
        TrayState::Ready
    } else {
        TrayState::Missing
    }
}

fn refresh_menu(
    controller: &ActivationController,
    field_items: &[(FieldKey, &'static str, MenuItem)],
    toggle_item: &MenuItem,
) {
    for (key, label, item) in field_items {
        let value = controller.store().get(*key);
        let shown = if value.trim().is_empty() {
            "NOT SET".to_string()
        } else {
            preview_value(*key, value)
        };
        item.set_text(format!("{label}: {shown}"));
    }

    toggle_item.set_text(if controller.is_active() {
        "Deactivate"
    } else {
        "Activate"
    });
}

fn update_status(
    controller: &ActivationController,
    status_item: &MenuItem,
    tray_icon: &mut Option<TrayIcon>,
    icons: &IconSet,
    status_text: Option<String>,
) {
    let text = status_text.unwrap_or_else(|| default_status_text(controller));
    status_item.set_text(format!("Status: {text}"));

    if let Some(icon) = tray_icon.as_ref() {
        let _ = icon.set_icon(Some(icons.icon(tray_state(controller))));
    }
}

fn default_status_text(controller: &ActivationController) -> String {
    if controller.is_active() {
        "Active".to_string()
    } else if controller.is_ready() {
        "Inactive (Config OK)".to_string()
    } else {
        "Inactive (Missing Config)".to_string()
    }
}

struct IconSet {
    active: Icon,
    ready: Icon,
    missing: Icon,
}

impl IconSet {
    fn new() -> Self {
        Self {
            active: build_state_icon([46, 204, 113]),
            ready: build_state_icon([255, 179, 0]),
            missing: build_state_icon([231, 76, 60]),
        }
    }

    fn icon(&self, state: TrayState) -> Icon {
        match state {
            TrayState::Active => self.active.clone(),
            TrayState::Ready => self.ready.clone(),
            TrayState::Missing => self.missing.clone(),
        }
    }
}

fn build_state_icon(fill_rgb: [u8; 3]) -> Icon {
    let (width, height) = (18, 18);
    let mut rgba = Vec::with_capacity(width * height * 4);
    let border = [40, 40, 40, 255];
    let fill = [fill_rgb[0], fill_rgb[1], fill_rgb[2], 255];
    let background = [0, 0, 0, 0];

    for y in 0..height {
        for x in 0..width {
            let is_border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
            let is_center = (x > 4 && x < 13) && (y > 4 && y < 13);
            let pixel = if is_border {
                border
            } else if is_center {
                fill
            } else {
                background
            };
            rgba.extend_from_slice(&pixel);
        }
    }

    Icon::from_rgba(rgba, width as u32, height as u32).expect("valid tray icon")
}
